//! taskrs client core.
//!
//! Session management and API access for the taskrs administration client:
//!
//! - `auth`: token decoding, session persistence, login/logout/refresh and
//!   scheduled token renewal, and the request authenticator
//! - `api`: the HTTP pipeline and the taskrs REST client
//! - `models`: wire types for users, categories, permissions and paging
//! - `config`: on-disk and environment configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthError, SessionManager, SessionState};
pub use config::Config;
