use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Request, Response, StatusCode};
use tracing::{debug, warn};

use crate::api::pipeline::{Exchange, RequestStage};

use super::{Navigator, SessionStore};

/// Attaches the stored access token to outgoing requests and sends the user
/// to login when a response comes back 401.
///
/// The token is attached whether or not it is still valid; the server decides.
/// This stage only reads the session store and never clears it.
pub struct RequestAuthenticator {
    store: Arc<dyn SessionStore>,
    navigator: Arc<dyn Navigator>,
}

impl RequestAuthenticator {
    pub fn new(store: Arc<dyn SessionStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self { store, navigator }
    }

    fn bearer(token: &str) -> Option<HeaderValue> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).ok()?;
        value.set_sensitive(true);
        Some(value)
    }
}

impl RequestStage for RequestAuthenticator {
    fn before_send(&self, request: &mut Request) {
        match self.store.access_token() {
            Ok(Some(token)) => match Self::bearer(&token) {
                Some(value) => {
                    request.headers_mut().insert(AUTHORIZATION, value);
                }
                None => {
                    warn!("Stored access token is not a valid header value, sending without it")
                }
            },
            Ok(None) => debug!(url = %request.url(), "No access token, sending unauthenticated"),
            Err(e) => warn!(error = %e, "Failed to read access token, sending unauthenticated"),
        }
    }

    fn after_response(&self, exchange: &Exchange, result: &Result<Response, reqwest::Error>) {
        if let Ok(response) = result {
            if response.status() == StatusCode::UNAUTHORIZED {
                warn!(url = %exchange.url, "Request unauthorized, redirecting to login");
                self.navigator.navigate_to_login();
            }
        }
    }
}
