//! # Data Ingestors Module
//!
//! Everything that brings the remote map into the engine.
//!
//! ## Contained Modules:
//! - **`map_source`**: the [`SnapshotSource`](crate::core::snapshot::SnapshotSource)
//!   that fetches and parses the live map page.
//! - **`map_polling`**: the cron-driven clock that ticks the cycle controller.

/// HTML map page snapshot source.
pub mod map_source;
/// Cron scheduler driving the cycle controller.
pub mod map_polling;

// --- Public API Re-exports ---
pub use map_polling::{PollScheduler, DEFAULT_SCHEDULE};
pub use map_source::{extract_cells, MapPageSource, DEFAULT_MAP_URL};
