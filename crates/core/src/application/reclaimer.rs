// Stuck-job reclaimer: recovers work from crashed or hung workers
use crate::application::alert::spawn_failure_alert;
use crate::application::worker::ShutdownToken;
use crate::domain::TaskType;
use crate::port::job_repository::STALLED_MESSAGE;
use crate::port::{FailureNotice, JobRepository, Notifier, ReclaimReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::domain::worker::DEFAULT_STALE_TIMEOUT;

/// Stuck-job reclaimer
///
/// A job left `in_progress` longer than the timeout is presumed abandoned and
/// returned to `pending`. `attempts` is not touched: the claim already counted
/// it, so a job that keeps stalling runs out of attempts and is failed here.
pub struct StuckJobReclaimer {
    job_repo: Arc<dyn JobRepository>,
    timeout: Duration,
    notifier: Option<Arc<dyn Notifier>>,
}

impl StuckJobReclaimer {
    /// Create a new reclaimer
    ///
    /// # Arguments
    /// * `job_repo` - Job repository
    /// * `timeout` - Optional custom stale timeout (default: 30 minutes)
    pub fn new(job_repo: Arc<dyn JobRepository>, timeout: Option<Duration>) -> Self {
        Self {
            job_repo,
            timeout: timeout.unwrap_or(DEFAULT_STALE_TIMEOUT),
            notifier: None,
        }
    }

    /// Alert through `notifier` when a stalled job has no attempts left
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Reclaim stalled jobs of the given task types (`None` = all)
    ///
    /// Safe to call from many workers at once: rows already reclaimed by
    /// another caller simply do not match.
    pub async fn reclaim(
        &self,
        task_types: Option<&[TaskType]>,
    ) -> crate::error::Result<ReclaimReport> {
        let report = self
            .job_repo
            .reclaim_stalled(task_types, self.timeout)
            .await?;

        if report.requeued > 0 {
            info!(
                requeued = report.requeued,
                timeout_secs = self.timeout.as_secs(),
                "Stalled jobs returned to pending"
            );
        }

        for job in &report.failed {
            warn!(
                job_id = job.id,
                task_type = %job.task_type,
                attempts = job.attempts,
                "Stalled job has no attempts left, marked failed"
            );
            if let Some(notifier) = &self.notifier {
                let message = job
                    .error_message
                    .clone()
                    .unwrap_or_else(|| STALLED_MESSAGE.to_string());
                spawn_failure_alert(notifier.clone(), FailureNotice::from_job(job, message));
            }
        }

        Ok(report)
    }

    /// Run the reclaimer on a fixed interval across all task types
    ///
    /// Should be spawned in tokio::spawn
    pub async fn run(self, every: Duration, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = every.as_secs(),
            timeout_secs = self.timeout.as_secs(),
            "Reclaimer started"
        );

        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.wait() => break,
            }
            if shutdown.is_shutdown() {
                break;
            }
            if let Err(e) = self.reclaim(None).await {
                error!(error = %e, "Reclaim sweep failed");
            }
        }

        info!("Reclaimer stopped");
    }
}
