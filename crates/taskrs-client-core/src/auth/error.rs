use thiserror::Error;

use crate::api::ApiError;

use super::store::StoreError;
use super::token::TokenError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Either email and password are wrong or the user is deactivated")]
    InvalidCredentials,

    #[error("Session rejected by server: {0}")]
    Rejected(#[source] ApiError),

    #[error(transparent)]
    Api(ApiError),

    #[error("Malformed token: {0}")]
    MalformedToken(#[from] TokenError),

    #[error("Session storage failed: {0}")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Login answers 400 for both unknown credentials and deactivated accounts
    pub(crate) fn from_login(error: ApiError) -> Self {
        match error {
            ApiError::BadRequest(_) => AuthError::InvalidCredentials,
            e if e.is_rejection() => AuthError::Rejected(e),
            e => AuthError::Api(e),
        }
    }

    pub(crate) fn from_session_call(error: ApiError) -> Self {
        if error.is_rejection() {
            AuthError::Rejected(error)
        } else {
            AuthError::Api(error)
        }
    }

    /// The server refused the credential; retrying with it will not help
    pub fn requires_login(&self) -> bool {
        matches!(self, AuthError::InvalidCredentials | AuthError::Rejected(_))
    }
}
