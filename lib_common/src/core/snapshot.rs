//! # Snapshot Types
//!
//! A snapshot is one polling cycle's raw extraction of the remote map: an
//! ordered list of cells, each carrying the three text fragments the engine
//! cares about. The fetch itself lives behind [`SnapshotSource`] so the cycle
//! logic can be driven by anything from a live HTTP scraper to a fixed vector
//! in a test.

use std::future::Future;

use thiserror::Error;

/// One map cell as extracted from the source, before sanitizing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCell {
    /// Text of the bottom-left corner; holds the flag glyph when active.
    pub left: String,
    /// Text of the bottom-right corner; first half of the location key.
    pub right: String,
    /// Text of the top-right corner; second half of the location key.
    pub top: String,
}

impl RawCell {
    /// Fragments in the order `left`, `right`, `top`.
    pub fn new(left: impl Into<String>, right: impl Into<String>, top: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
            top: top.into(),
        }
    }
}

/// One cycle's cells, in source order.
pub type Snapshot = Vec<RawCell>;

/// Failure to obtain a snapshot for a cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The request failed before a response arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx response.
    #[error("remote source answered with HTTP status {0}")]
    Status(u16),

    /// The body could not be read as a map page.
    #[error("unparseable content: {0}")]
    Parse(String),

    /// The page parsed but held no cells.
    #[error("page contained no map cells")]
    NoCells,
}

/// Anything that can produce a [`Snapshot`] on demand.
///
/// Implementations perform no retries of their own beyond transport-level
/// policy; the scheduling cadence is the retry loop.
pub trait SnapshotSource: Send + Sync {
    /// Fetches and extracts the current cells.
    fn fetch_snapshot(&self) -> impl Future<Output = Result<Snapshot, FetchError>> + Send;
}
