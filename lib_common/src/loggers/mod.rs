//! # Logging Modules
//!
//! `tracing` subscriber setup shared by the binaries.

pub mod logger_tracing;

pub use logger_tracing::{build_subscriber, build_subscriber_with_filter, init_logging, LoggerOptions};
