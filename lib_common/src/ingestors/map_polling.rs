//! # Poll Scheduler
//!
//! The external clock for the cycle controller: a cron job (seconds
//! resolution, UTC) that calls [`CycleController::tick`] on every firing. The
//! controller itself has no timer; this is the only place time drives it.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::core::cycle::{CycleController, TickOutcome};
use crate::core::snapshot::SnapshotSource;

/// Every minute, on the minute.
pub const DEFAULT_SCHEDULE: &str = "0 * * * * *";

pub struct PollScheduler {
    scheduler: JobScheduler,
}

impl PollScheduler {
    /// Registers the tick job and starts the scheduler.
    pub async fn start<S>(controller: Arc<CycleController<S>>, schedule: &str) -> Result<Self, JobSchedulerError>
    where
        S: SnapshotSource + 'static,
    {
        let scheduler = JobScheduler::new().await?;

        let job = Job::new_async(schedule, move |_uuid, _lock| {
            let controller = controller.clone();
            Box::pin(async move {
                match controller.tick().await {
                    TickOutcome::Completed(report) => tracing::debug!(
                        cycle = report.cycle,
                        cells = report.cells,
                        activations = report.activations.len(),
                        delivered = report.deliveries.delivered,
                        active = report.active,
                        "Cycle completed"
                    ),
                    TickOutcome::FetchFailed(_) | TickOutcome::Busy => {}
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;
        tracing::info!("Poll scheduler started with schedule '{}'", schedule);

        Ok(Self { scheduler })
    }

    /// Stops firing ticks. A tick already running is not interrupted.
    pub async fn shutdown(mut self) -> Result<(), JobSchedulerError> {
        self.scheduler.shutdown().await?;
        tracing::info!("Poll scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::Dispatcher;
    use crate::core::rate_limiter::RateLimiter;
    use crate::core::registry::ClientRegistry;
    use crate::core::snapshot::{FetchError, RawCell, Snapshot};
    use std::time::Duration;

    struct FixedSource;

    impl SnapshotSource for FixedSource {
        async fn fetch_snapshot(&self) -> Result<Snapshot, FetchError> {
            Ok(vec![RawCell::new("\u{2694}\u{FE0F}", "A", "1")])
        }
    }

    fn controller() -> Arc<CycleController<FixedSource>> {
        let registry = Arc::new(ClientRegistry::new("tok", RateLimiter::default()));
        Arc::new(CycleController::new(FixedSource, Dispatcher::new(registry)))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scheduler_drives_ticks() {
        let controller = controller();

        let scheduler = PollScheduler::start(controller.clone(), "* * * * * *").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.shutdown().await.unwrap();

        assert!(controller.cycles() >= 1);
        assert_eq!(controller.active_keys().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invalid_schedule_is_rejected() {
        assert!(PollScheduler::start(controller(), "every minute").await.is_err());
    }
}
