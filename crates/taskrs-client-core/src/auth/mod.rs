//! Authentication module for managing the client session.
//!
//! This module provides:
//! - `token`: unverified decoding of the access token's expiry claim
//! - `SessionStore`: durable storage of the access/refresh token pair
//! - `SessionManager`: login, logout, refresh and scheduled renewal
//! - `RequestAuthenticator`: the pipeline stage that attaches the bearer token
//!
//! Sessions are persisted across restarts; the renewal schedule is not, and is
//! re-armed by the manager's startup refresh.

pub mod authenticator;
pub mod clock;
pub mod error;
pub mod navigator;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod token;

pub use authenticator::RequestAuthenticator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::AuthError;
pub use navigator::{LogNavigator, Navigator};
pub use scheduler::{ManualScheduler, Scheduler, Task, TaskHandle, TokioScheduler};
pub use session::{SessionManager, SessionManagerBuilder, SessionState, DEFAULT_REFRESH_BUFFER_SECS};
pub use store::{
    FileBackend, KeyValueBackend, KeyValueSessionStore, KeyringBackend, MemoryBackend,
    MemorySessionStore, SessionRecord, SessionStore, StoreError,
};
pub use token::{Claims, TokenError};
