//! Daily trigger for the catalog sync.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{SyncError, SyncRunSummary, SyncService};

/// Whether a schedule registration currently exists for this process.
#[derive(Debug, Default)]
pub struct SchedulerState {
    armed: AtomicBool,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Returns `true` only for the caller that flipped the state.
    pub fn arm(&self) -> bool {
        self.armed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn disarm(&self) -> bool {
        self.armed
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

struct ArmedSchedule {
    scheduler: JobScheduler,
    job_id: Uuid,
    cron: String,
}

pub struct ReleaseScheduler {
    service: Arc<SyncService>,
    state: Arc<SchedulerState>,
    armed: Mutex<Option<ArmedSchedule>>,
}

impl ReleaseScheduler {
    pub fn new(service: Arc<SyncService>, state: Arc<SchedulerState>) -> Self {
        Self {
            service,
            state,
            armed: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &Arc<SchedulerState> {
        &self.state
    }

    /// Registers the daily sync job. A second call while armed is a logged no-op and
    /// returns `Ok(false)`.
    pub async fn schedule(&self, cron: &str) -> Result<bool, SyncError> {
        let mut armed = self.armed.lock().await;
        if !self.state.arm() {
            let current = armed.as_ref().map(|a| a.cron.as_str()).unwrap_or("<unknown>");
            info!(requested = cron, current, "catalog sync already scheduled; ignoring");
            return Ok(false);
        }

        match self.register(cron).await {
            Ok(schedule) => {
                info!(cron, job_id = %schedule.job_id, "catalog sync scheduled");
                *armed = Some(schedule);
                Ok(true)
            }
            Err(err) => {
                self.state.disarm();
                Err(err)
            }
        }
    }

    async fn register(&self, cron: &str) -> Result<ArmedSchedule, SyncError> {
        let scheduler = JobScheduler::new().await?;
        let service = Arc::clone(&self.service);
        let job = Job::new_async(cron, move |_uuid, _lock| {
            let service = Arc::clone(&service);
            Box::pin(async move {
                info!(event = "job_started", job_name = "catalog_sync", "scheduled catalog sync triggered");
                match service.run_now().await {
                    Ok(summary) => info!(
                        event = "job_finished",
                        job_name = "catalog_sync",
                        run_id = %summary.run_id,
                        success = summary.success,
                        "scheduled catalog sync finished"
                    ),
                    Err(SyncError::RunInProgress) => warn!(
                        event = "job_skipped",
                        job_name = "catalog_sync",
                        "previous catalog sync still running; skipping this trigger"
                    ),
                    Err(err) => error!(
                        event = "job_failed",
                        job_name = "catalog_sync",
                        error = %err,
                        "scheduled catalog sync failed"
                    ),
                }
            })
        })?;
        let job_id = scheduler.add(job).await?;
        scheduler.start().await?;
        Ok(ArmedSchedule {
            scheduler,
            job_id,
            cron: cron.to_string(),
        })
    }

    /// Runs the same job immediately, outside the schedule.
    pub async fn run_now(&self) -> Result<SyncRunSummary, SyncError> {
        self.service.run_now().await
    }

    /// Cancels registered jobs. An in-flight run is left to finish.
    ///
    /// The state is disarmed even when teardown fails, so a later `schedule` can register again.
    pub async fn stop(&self) -> Result<(), SyncError> {
        self.stop_with(teardown).await
    }

    async fn stop_with<F, Fut>(&self, teardown: F) -> Result<(), SyncError>
    where
        F: FnOnce(ArmedSchedule) -> Fut,
        Fut: Future<Output = Result<(), SyncError>>,
    {
        let mut armed = self.armed.lock().await;
        let outcome = match armed.take() {
            Some(schedule) => teardown(schedule).await,
            None => Ok(()),
        };
        self.state.disarm();
        outcome
    }
}

async fn teardown(mut schedule: ArmedSchedule) -> Result<(), SyncError> {
    schedule.scheduler.remove(&schedule.job_id).await?;
    schedule.scheduler.shutdown().await?;
    info!(cron = %schedule.cron, "catalog sync schedule stopped");
    Ok(())
}
