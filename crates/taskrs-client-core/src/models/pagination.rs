use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationPage<T> {
    pub page: Option<i32>,
    pub page_count: Option<i32>,
    pub page_size: Option<i32>,
    pub total_count: Option<i32>,
    pub items: Vec<T>,
}

impl<T> PaginationPage<T> {
    /// True when the server reports a page after this one
    pub fn has_next(&self) -> bool {
        match (self.page, self.page_count) {
            (Some(page), Some(count)) => page + 1 < count,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page() {
        let json = r#"{"page":0,"pageCount":3,"pageSize":25,"totalCount":51,"items":[1,2]}"#;
        let page: PaginationPage<i32> = serde_json::from_str(json).unwrap();
        assert_eq!(page.items, vec![1, 2]);
        assert_eq!(page.total_count, Some(51));
        assert!(page.has_next());
    }

    #[test]
    fn test_has_next_last_page() {
        let page = PaginationPage::<i32> {
            page: Some(2),
            page_count: Some(3),
            ..Default::default()
        };
        assert!(!page.has_next());
        assert!(!PaginationPage::<i32>::default().has_next());
    }
}
