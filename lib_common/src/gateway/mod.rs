//! # WebSocket Gateway Module
//!
//! The network face of the service: an `axum` server that upgrades
//! subscribers, authenticates them through the core
//! [`ClientRegistry`](crate::core::registry::ClientRegistry), runs one session
//! task per connection and drains them on shutdown.
//!
//! ## Contained Modules:
//! - **`server`**: router, listener loop and shared [`GatewayState`].
//! - **`session`**: the per-connection task.
//! - **`http_limit`**: per-IP `tower_governor` quota on the plain HTTP routes.

pub mod http_limit;
pub mod server;
pub mod session;

// --- Public API Re-exports ---
pub use http_limit::{limit_by_ip, HttpLimitError, HttpQuota, TOO_MANY_REQUESTS_BODY};
pub use server::{router, serve, GatewayState};
pub use session::{RATE_LIMIT_TEXT, SHUTDOWN_REASON, UNAUTHORIZED_REASON, WELCOME_TEXT};
