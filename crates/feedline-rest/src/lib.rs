//! REST backend for feedline
//!
//! - `client` - ApiClient (HTTP client with bearer auth)
//! - `models` - wire models for posts, blogs, comments, notifications, users
//! - `resource` - Resource paths and the PageFetcher bound to them
//! - `actions` - like/unlike/delete with optimistic cache edits
//! - `auth` - login with two-factor, logout, persisted auth state

pub mod actions;
pub mod auth;
pub mod client;
pub mod models;
pub mod resource;

pub use actions::{delete_item, set_liked};
pub use auth::{
    AuthBackend, AuthSession, AuthState, AuthStatus, AuthStore, FileAuthStore, MemoryAuthStore,
};
pub use client::ApiClient;
pub use models::*;
pub use resource::{Resource, ResourceFetcher};
