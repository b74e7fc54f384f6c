//! # Configuration Modules
//!
//! Layered process configuration: defaults, JSON config file, environment and
//! command line.

/// Resolves the server's settings and fails fast on a missing secret.
pub mod config_app;

pub use config_app::{AppConfig, ConfigArgs, ConfigError};
