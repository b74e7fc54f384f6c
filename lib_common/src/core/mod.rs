//! # Core Engine Module
//!
//! The state-diffing and notification-dispatch engine. Everything here is
//! transport-agnostic: snapshots come in through [`snapshot::SnapshotSource`],
//! notifications leave as [`registry::Outbound`] frames on per-connection
//! channels.
//!
//! ## Core Components:
//!
//! - **`sanitizer`**: normalizes scraped text into location keys.
//! - **`tracker`**: owns the Active Set and computes per-cycle activations.
//! - **`rate_limiter`**: sliding-window admission control for inbound chatter.
//! - **`registry`**: authorized connections and their rate-limit windows.
//! - **`dispatcher`**: best-effort fan-out of activations.
//! - **`cycle`**: one poll → diff → broadcast pass per clock tick.

#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Location key normalization.
pub mod sanitizer;
/// Snapshot types and the source trait.
pub mod snapshot;
/// The Active Set and the diff algorithm.
pub mod tracker;
/// Sliding-window admission control.
pub mod rate_limiter;
/// Connection registry with per-connection state machine.
pub mod registry;
/// Fan-out of activation events.
pub mod dispatcher;
/// The per-tick orchestration.
pub mod cycle;

// --- Public API Re-exports ---
pub use cycle::{CycleController, CycleReport, TickOutcome};
pub use dispatcher::{DeliveryReport, Dispatcher};
pub use rate_limiter::{MessageWindow, RateLimiter};
pub use registry::{ClientRegistry, ConnectionId, ConnectionState, Outbound, RegistryError, Subscriber};
pub use snapshot::{FetchError, RawCell, Snapshot, SnapshotSource};
pub use tracker::{ActivationEvent, LocationKey, StateTracker};
