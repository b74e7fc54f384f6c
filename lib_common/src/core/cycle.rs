//! # Cycle Controller
//!
//! Entry point for the external clock. One [`CycleController::tick`] runs a
//! full poll → sanitize → diff → broadcast pass.
//!
//! ## Workflow
//! 1. Claim the tracker. If a previous tick still holds it, this tick is
//!    skipped (`Busy`); cycles never overlap.
//! 2. Fetch the snapshot. On failure, log it and end the cycle. The Active Set
//!    is untouched.
//! 3. Diff the snapshot against the Active Set.
//! 4. Broadcast each activation in snapshot order.
//!
//! Steps 3 and 4 never suspend, so a diff-and-broadcast pass is atomic with
//! respect to connection admissions and rate-limit checks.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::Mutex;

use super::dispatcher::{DeliveryReport, Dispatcher};
use super::snapshot::{FetchError, SnapshotSource};
use super::tracker::{LocationKey, StateTracker};

/// Summary of a completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// One-based cycle number.
    pub cycle: u64,
    /// Cells in the snapshot.
    pub cells: usize,
    /// Activation events produced.
    pub activations: Vec<LocationKey>,
    /// Summed over every activation.
    pub deliveries: DeliveryReport,
    /// Size of the Active Set after the diff.
    pub active: usize,
}

/// What one call to [`CycleController::tick`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Fetch, diff and broadcast all ran.
    Completed(CycleReport),
    /// The snapshot could not be fetched; the Active Set is unchanged.
    FetchFailed(FetchError),
    /// The previous cycle was still running.
    Busy,
}

/// Drives fetch, diff and broadcast over one source. At most one cycle runs
/// at a time.
pub struct CycleController<S> {
    source: S,
    dispatcher: Dispatcher,
    tracker: Mutex<StateTracker>,
    cycles: AtomicU64,
}

impl<S: SnapshotSource> CycleController<S> {
    /// Starts with an empty Active Set.
    pub fn new(source: S, dispatcher: Dispatcher) -> Self {
        Self {
            source,
            dispatcher,
            tracker: Mutex::new(StateTracker::new()),
            cycles: AtomicU64::new(0),
        }
    }

    /// Runs one cycle, or returns `Busy` if another is still in flight.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(mut tracker) = self.tracker.try_lock() else {
            tracing::warn!("Previous cycle still running, skipping this tick");
            return TickOutcome::Busy;
        };

        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(cycle, "Checking for new entries...");

        let snapshot = match self.source.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(cycle, "Error fetching the page: {}", e);
                return TickOutcome::FetchFailed(e);
            }
        };

        let events = tracker.diff(&snapshot, Utc::now());
        for event in &events {
            tracing::info!(cycle, "New \u{2694}\u{FE0F} detected at location: {}", event.key);
        }
        let deliveries = self.dispatcher.broadcast_all(&events);

        TickOutcome::Completed(CycleReport {
            cycle,
            cells: snapshot.len(),
            activations: events.into_iter().map(|e| e.key).collect(),
            deliveries,
            active: tracker.len(),
        })
    }

    /// Resolves once no cycle is in flight.
    pub async fn wait_idle(&self) {
        drop(self.tracker.lock().await);
    }

    /// Waits for any in-flight cycle, then lists the Active Set.
    pub async fn active_keys(&self) -> Vec<LocationKey> {
        self.tracker.lock().await.active_keys()
    }

    /// Cycles started so far, skipped ticks excluded.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rate_limiter::RateLimiter;
    use crate::core::registry::{ClientRegistry, Outbound};
    use crate::core::snapshot::{RawCell, Snapshot};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;
    use tokio::sync::{mpsc, Notify};

    const SWORDS: &str = "\u{2694}\u{FE0F}";

    /// Replays a scripted sequence of fetch results.
    struct ScriptedSource {
        script: StdMutex<VecDeque<Result<Snapshot, FetchError>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Snapshot, FetchError>>) -> Self {
            Self {
                script: StdMutex::new(script.into()),
            }
        }
    }

    impl SnapshotSource for ScriptedSource {
        async fn fetch_snapshot(&self) -> Result<Snapshot, FetchError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(FetchError::NoCells))
        }
    }

    /// Blocks inside the fetch until released.
    struct GatedSource {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl SnapshotSource for GatedSource {
        async fn fetch_snapshot(&self) -> Result<Snapshot, FetchError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(vec![RawCell::new(SWORDS, "A", "1")])
        }
    }

    fn swords(right: &str, top: &str) -> RawCell {
        RawCell::new(SWORDS, right, top)
    }

    fn subscribed<S: SnapshotSource>(
        source: S,
    ) -> (CycleController<S>, mpsc::UnboundedReceiver<Outbound>) {
        let registry = Arc::new(ClientRegistry::new("tok", RateLimiter::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        registry.admit(Some("tok"), tx).unwrap();
        (CycleController::new(source, Dispatcher::new(registry)), rx)
    }

    fn completed(outcome: TickOutcome) -> CycleReport {
        match outcome {
            TickOutcome::Completed(report) => report,
            other => panic!("expected a completed cycle, got {:?}", other),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn test_repeated_snapshot_notifies_once() {
        let snapshot = vec![swords("A", "1")];
        let (controller, mut rx) = subscribed(ScriptedSource::new(vec![
            Ok(snapshot.clone()),
            Ok(snapshot),
        ]));

        let first = completed(controller.tick().await);
        assert_eq!(first.activations, vec![LocationKey::new("A1")]);
        assert_eq!(first.deliveries.delivered, 1);
        assert_eq!(
            drain(&mut rx),
            vec![Outbound::Text(format!("New {} detected at location: A1", SWORDS).into())]
        );

        let second = completed(controller.tick().await);
        assert!(second.activations.is_empty());
        assert_eq!(second.active, 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_unflagged_cell_clears_without_event() {
        let (controller, mut rx) = subscribed(ScriptedSource::new(vec![
            Ok(vec![swords("A", "1")]),
            Ok(vec![RawCell::new("", "A", "1")]),
        ]));

        completed(controller.tick().await);
        drain(&mut rx);
        let report = completed(controller.tick().await);

        assert!(report.activations.is_empty());
        assert_eq!(report.active, 0);
        assert!(controller.active_keys().await.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_state_untouched() {
        let (controller, mut rx) = subscribed(ScriptedSource::new(vec![
            Ok(vec![swords("A", "1")]),
            Err(FetchError::Transport("connection refused".into())),
            Ok(vec![swords("A", "1"), swords("B", "2")]),
        ]));

        completed(controller.tick().await);
        drain(&mut rx);

        let failed = controller.tick().await;
        assert_eq!(
            failed,
            TickOutcome::FetchFailed(FetchError::Transport("connection refused".into()))
        );
        assert_eq!(controller.active_keys().await, vec![LocationKey::new("A1")]);
        assert!(drain(&mut rx).is_empty());

        let recovered = completed(controller.tick().await);
        assert_eq!(recovered.cycle, 3);
        assert_eq!(recovered.activations, vec![LocationKey::new("B2")]);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (controller, _rx) = subscribed(GatedSource {
            entered: entered.clone(),
            release: release.clone(),
        });
        let controller = Arc::new(controller);

        let running = tokio::spawn({
            let controller = controller.clone();
            async move { controller.tick().await }
        });
        entered.notified().await;

        assert_eq!(controller.tick().await, TickOutcome::Busy);
        assert_eq!(controller.cycles(), 1);

        release.notify_one();
        let report = completed(running.await.unwrap());
        assert_eq!(report.activations, vec![LocationKey::new("A1")]);
    }

    #[tokio::test]
    async fn test_wait_idle_waits_for_running_cycle() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (controller, _rx) = subscribed(GatedSource {
            entered: entered.clone(),
            release: release.clone(),
        });
        let controller = Arc::new(controller);

        let running = tokio::spawn({
            let controller = controller.clone();
            async move { controller.tick().await }
        });
        entered.notified().await;

        let idle = tokio::time::timeout(Duration::from_millis(50), controller.wait_idle()).await;
        assert!(idle.is_err(), "wait_idle returned while a cycle was running");

        release.notify_one();
        running.await.unwrap();
        controller.wait_idle().await;
        assert_eq!(controller.active_keys().await.len(), 1);
    }
}
