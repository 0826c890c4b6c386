use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Order {
    Ascending,
    Descending,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Ascending => "ascending",
            Order::Descending => "descending",
        }
    }
}

/// Search, sort and paging options for list endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub query: Option<String>,
    pub order_by: Option<String>,
    pub order: Option<Order>,
    pub page: Option<i32>,
    pub limit: Option<i32>,
}

impl RequestFilter {
    /// Query parameters for the set fields only
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(ref query) = self.query {
            params.push(("query", query.clone()));
        }
        if let Some(ref order_by) = self.order_by {
            params.push(("orderBy", order_by.clone()));
        }
        if let Some(order) = self.order {
            params.push(("order", order.as_str().to_string()));
        }
        if let Some(page) = self.page {
            params.push(("page", page.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        params
    }
}
