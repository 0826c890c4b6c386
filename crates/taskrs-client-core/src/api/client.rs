//! API client for the taskrs server.
//!
//! Every call, including the authentication endpoints, goes through the
//! `HttpPipeline`, so the request authenticator sees all traffic.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::models::tokens::LoginRequest;
use crate::models::{
    Category, PaginationPage, Permission, PermissionAssignment, RequestFilter, TokenPair, User,
};

use super::pipeline::HttpPipeline;
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// The server expects an explicit charset on raw JSON string bodies
const JSON_UTF8: &str = "application/json; charset=utf-8";

const AUTH_PATH: &str = "auth";
const USERS_PATH: &str = "users";
const CATEGORIES_PATH: &str = "categories";
const PERMISSIONS_PATH: &str = "permissions";

/// API client for the taskrs server.
/// Clone is cheap - the pipeline shares its connection pool and stages.
#[derive(Clone)]
pub struct ApiClient {
    pipeline: HttpPipeline,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, pipeline: HttpPipeline) -> Self {
        Self {
            pipeline,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build the underlying HTTP client with the given request timeout
    pub fn http_client(timeout: Duration) -> Result<Client, ApiError> {
        Ok(Client::builder().timeout(timeout).build()?)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Response, ApiError> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut builder = self.pipeline.client().request(method.clone(), &url);
            if !query.is_empty() {
                builder = builder.query(query);
            }
            if let Some(ref body) = body {
                builder = builder.header(CONTENT_TYPE, JSON_UTF8).body(body.clone());
            }
            let response = self.pipeline.execute(builder.build()?).await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let url = response.url().clone();
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e))
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let response = self.send(Method::GET, path, query, None).await?;
        Self::parse(response).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_vec(body)?;
        let response = self.send(Method::POST, path, &[], Some(body)).await?;
        Self::parse(response).await
    }

    /// POST where the server answers with an empty body
    async fn post_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        let body = serde_json::to_vec(body)?;
        self.send(Method::POST, path, &[], Some(body)).await?;
        Ok(())
    }

    async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_vec(body)?;
        let response = self.send(Method::PUT, path, &[], Some(body)).await?;
        Self::parse(response).await
    }

    async fn delete(&self, path: &str, query: &[(&str, String)]) -> Result<(), ApiError> {
        self.send(Method::DELETE, path, query, None).await?;
        Ok(())
    }

    fn filter_query(filter: Option<&RequestFilter>) -> Vec<(&'static str, String)> {
        filter.map(RequestFilter::to_query).unwrap_or_default()
    }

    // ===== Authentication =====

    /// Exchange credentials for a token pair
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, ApiError> {
        let path = format!("{}/login", AUTH_PATH);
        self.post(&path, &LoginRequest { email, password }).await
    }

    /// Invalidate a refresh token server-side. The body is the token as a raw
    /// JSON string, or `null` when none is stored.
    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<(), ApiError> {
        let path = format!("{}/logout", AUTH_PATH);
        self.post_unit(&path, &refresh_token).await
    }

    /// Exchange a refresh token for a new access token
    pub async fn refresh_token(&self, refresh_token: Option<&str>) -> Result<String, ApiError> {
        let path = format!("{}/token", AUTH_PATH);
        self.post(&path, &refresh_token).await
    }

    // ===== Users =====

    pub async fn all_users(
        &self,
        filter: Option<&RequestFilter>,
    ) -> Result<PaginationPage<User>, ApiError> {
        self.get(USERS_PATH, &Self::filter_query(filter)).await
    }

    pub async fn create_user(&self, user: &User) -> Result<User, ApiError> {
        self.post(USERS_PATH, user).await
    }

    pub async fn update_user(&self, user: &User) -> Result<User, ApiError> {
        self.put(USERS_PATH, user).await
    }

    pub async fn delete_user(&self, id: i32) -> Result<(), ApiError> {
        self.delete(USERS_PATH, &[("id", id.to_string())]).await
    }

    // ===== Categories =====

    pub async fn all_categories(
        &self,
        filter: Option<&RequestFilter>,
    ) -> Result<PaginationPage<Category>, ApiError> {
        self.get(CATEGORIES_PATH, &Self::filter_query(filter)).await
    }

    /// Direct children of `id`, or the root categories when `id` is None
    pub async fn sub_categories(&self, id: Option<i32>) -> Result<Vec<Category>, ApiError> {
        let path = format!("{}/sub", CATEGORIES_PATH);
        let query: Vec<(&str, String)> =
            id.map(|id| vec![("id", id.to_string())]).unwrap_or_default();
        self.get(&path, &query).await
    }

    pub async fn create_category(&self, category: &Category) -> Result<Category, ApiError> {
        self.post(CATEGORIES_PATH, category).await
    }

    pub async fn update_category(&self, category: &Category) -> Result<Category, ApiError> {
        self.put(CATEGORIES_PATH, category).await
    }

    pub async fn delete_category(&self, id: i32, cascade: Option<bool>) -> Result<(), ApiError> {
        let mut query = vec![("id", id.to_string())];
        if let Some(cascade) = cascade {
            query.push(("cascade", cascade.to_string()));
        }
        self.delete(CATEGORIES_PATH, &query).await
    }

    // ===== Permissions =====

    pub async fn all_permissions(
        &self,
        filter: Option<&RequestFilter>,
    ) -> Result<PaginationPage<Permission>, ApiError> {
        self.get(PERMISSIONS_PATH, &Self::filter_query(filter)).await
    }

    pub async fn grant_permissions(
        &self,
        user_id: i32,
        permission_ids: &[i32],
    ) -> Result<(), ApiError> {
        self.change_permissions("grant", user_id, permission_ids).await
    }

    pub async fn revoke_permissions(
        &self,
        user_id: i32,
        permission_ids: &[i32],
    ) -> Result<(), ApiError> {
        self.change_permissions("revoke", user_id, permission_ids).await
    }

    /// Replace all permissions of a user
    pub async fn set_user_permissions(
        &self,
        user_id: i32,
        permission_ids: &[i32],
    ) -> Result<(), ApiError> {
        self.change_permissions("set", user_id, permission_ids).await
    }

    async fn change_permissions(
        &self,
        action: &str,
        user_id: i32,
        permission_ids: &[i32],
    ) -> Result<(), ApiError> {
        let path = format!("{}/{}", PERMISSIONS_PATH, action);
        let body = PermissionAssignment {
            user_id,
            permission_ids: permission_ids.to_vec(),
        };
        self.post_unit(&path, &body).await
    }
}
