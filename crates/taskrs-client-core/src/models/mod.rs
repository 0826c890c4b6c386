//! Data models for taskrs entities.
//!
//! - `TokenPair`: credentials issued by login
//! - `User`, `Category`, `Permission`: administrable entities
//! - `PaginationPage`, `RequestFilter`: list paging and filtering

pub mod category;
pub mod filter;
pub mod pagination;
pub mod permission;
pub mod tokens;
pub mod user;

pub use category::Category;
pub use filter::{Order, RequestFilter};
pub use pagination::PaginationPage;
pub use permission::{Permission, PermissionAssignment};
pub use tokens::TokenPair;
pub use user::User;
