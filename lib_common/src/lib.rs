//! # lib_common
//!
//! The shared library behind the `warwatch` map watcher. It polls a remote map
//! page, keeps the set of currently flagged locations, and pushes a text
//! notification to every authenticated WebSocket subscriber whenever a
//! location becomes flagged.
//!
//! The [`core`] engine is always compiled. Everything that touches the outside
//! world sits behind a cargo feature:
//!
//! | feature     | module        | contents                                   |
//! |-------------|---------------|--------------------------------------------|
//! | `configs`   | [`configs`]   | layered settings (defaults, file, env/CLI) |
//! | `loggers`   | [`loggers`]   | `tracing` subscriber setup                 |
//! | `retrieve`  | [`retrieve`]  | HTTP client with retry middleware          |
//! | `ingestors` | [`ingestors`] | map page source and poll scheduler         |
//! | `gateway`   | [`gateway`]   | `axum` WebSocket gateway                   |
//!
//! `full` enables all of them.

#![forbid(unsafe_code)]

pub mod core;

#[cfg(feature = "configs")]
pub mod configs;

#[cfg(feature = "gateway")]
pub mod gateway;

#[cfg(feature = "ingestors")]
pub mod ingestors;

#[cfg(feature = "loggers")]
pub mod loggers;

#[cfg(feature = "retrieve")]
pub mod retrieve;
