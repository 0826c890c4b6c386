//! REST API client module for the taskrs server.
//!
//! This module provides the `ApiClient` for the authentication endpoints and
//! the user, category and permission resources, and the `HttpPipeline` that
//! every request passes through on its way out.
//!
//! The API uses JWT bearer token authentication; tokens are attached by the
//! `RequestAuthenticator` stage from `crate::auth`.

pub mod client;
pub mod error;
pub mod pipeline;

pub use client::ApiClient;
pub use error::ApiError;
pub use pipeline::{Exchange, HttpPipeline, RequestStage, RequestTracing};
