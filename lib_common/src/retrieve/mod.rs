//! # Data Retrieval Module
//!
//! Generic HTTP retrieval used by the ingestors.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: an `ApiClient` built on `reqwest` and `reqwest-middleware`,
//!   with configurable transient-failure retries. It serves the map page
//!   snapshot source.

/// Generic HTTP API client with retry middleware for resilient network requests.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse, ClientOptions};
