// Job Repository Port (Interface)

use crate::domain::{millis_before, Job, JobId, JobStatus, NewJob, RetryPolicy, TaskType};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Error message stored on a job failed by the reclaimer
pub const STALLED_MESSAGE: &str = "stalled in progress past the timeout";

/// What `record_failure` did to the job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to pending, claimable again at `available_at` (epoch ms)
    Retrying { available_at: i64, delay: Duration },
    /// Permanently failed
    Failed,
    /// The claim is no longer current (resolved, or reclaimed and claimed
    /// again), nothing changed
    Ignored,
}

/// Result of one stalled-job sweep
#[derive(Debug, Clone, Default)]
pub struct ReclaimReport {
    /// Jobs returned to pending
    pub requeued: u64,
    /// Stalled jobs with no attempts left, now failed
    pub failed: Vec<Job>,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        self.requeued == 0 && self.failed.is_empty()
    }
}

/// Job count for one (task type, status) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub task_type: String,
    pub status: JobStatus,
    pub count: i64,
}

/// Repository interface for the job store
///
/// Every job state transition goes through `claim_batch`, `record_success`,
/// `record_failure` or `reclaim_stalled`; implementations read the current
/// time from their injected `TimeProvider`.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new pending job with `available_at = now + delay`
    async fn insert(&self, job: &NewJob) -> Result<JobId>;

    /// Find job by ID
    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>>;

    /// Atomically claim up to `limit` eligible jobs of the given task types
    ///
    /// Oldest `available_at` first. Each returned job is `in_progress` with
    /// `attempts` incremented; no two callers ever receive the same job.
    async fn claim_batch(&self, task_types: &[TaskType], limit: usize) -> Result<Vec<Job>>;

    /// Mark an in-progress job completed
    ///
    /// `attempt` is the `attempts` value the job carried when it was claimed.
    /// Returns `false` (and changes nothing) unless the job is still in
    /// progress under that same claim.
    async fn record_success(
        &self,
        id: JobId,
        attempt: i32,
        result: Option<serde_json::Value>,
    ) -> Result<bool>;

    /// Record a handler failure, retrying or failing per the policy
    ///
    /// Guarded on the claim like `record_success`; a stale claim yields
    /// `FailureOutcome::Ignored`.
    async fn record_failure(
        &self,
        id: JobId,
        attempt: i32,
        message: &str,
        retryable: bool,
        policy: &RetryPolicy,
    ) -> Result<FailureOutcome>;

    /// Return jobs stuck in progress for longer than `timeout` to pending
    ///
    /// `task_types = None` sweeps every task type.
    async fn reclaim_stalled(
        &self,
        task_types: Option<&[TaskType]>,
        timeout: Duration,
    ) -> Result<ReclaimReport>;

    /// Count jobs by status, optionally for one task type
    async fn count_by_status(&self, task_type: Option<&TaskType>, status: JobStatus)
        -> Result<i64>;

    /// Job counts grouped by task type and status
    async fn status_counts(&self) -> Result<Vec<StatusCount>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::{JobPayload, RetryDecision};
    use crate::error::AppError;
    use crate::port::TimeProvider;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory job store following the same transition rules as the SQL backends
    pub struct InMemoryJobRepository {
        jobs: Mutex<BTreeMap<JobId, Job>>,
        clock: Arc<dyn TimeProvider>,
        unavailable: AtomicBool,
    }

    impl InMemoryJobRepository {
        pub fn new(clock: Arc<dyn TimeProvider>) -> Self {
            Self {
                jobs: Mutex::new(BTreeMap::new()),
                clock,
                unavailable: AtomicBool::new(false),
            }
        }

        /// Make every call fail with a database error until switched back
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        pub fn snapshot(&self) -> Vec<Job> {
            self.jobs.lock().unwrap().values().cloned().collect()
        }

        fn check_available(&self) -> Result<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AppError::Database("store unavailable".to_string()));
            }
            Ok(())
        }
    }

    fn matches(task_types: Option<&[TaskType]>, job: &Job) -> bool {
        task_types.map_or(true, |types| types.contains(&job.task_type))
    }

    #[async_trait]
    impl JobRepository for InMemoryJobRepository {
        async fn insert(&self, new_job: &NewJob) -> Result<JobId> {
            self.check_available()?;
            let now = self.clock.now_millis();
            let available_at = new_job.available_at(now)?;
            let mut jobs = self.jobs.lock().unwrap();
            let id = jobs.keys().next_back().copied().unwrap_or(0) + 1;
            jobs.insert(
                id,
                Job {
                    id,
                    task_type: new_job.task_type.clone(),
                    status: JobStatus::Pending,
                    payload: JobPayload::new(new_job.payload.as_value().clone()),
                    result: None,
                    attempts: 0,
                    max_attempts: new_job.max_attempts,
                    available_at,
                    started_at: None,
                    completed_at: None,
                    error_message: None,
                    created_at: now,
                },
            );
            Ok(id)
        }

        async fn find_by_id(&self, id: JobId) -> Result<Option<Job>> {
            self.check_available()?;
            Ok(self.jobs.lock().unwrap().get(&id).cloned())
        }

        async fn claim_batch(&self, task_types: &[TaskType], limit: usize) -> Result<Vec<Job>> {
            self.check_available()?;
            let now = self.clock.now_millis();
            let mut jobs = self.jobs.lock().unwrap();

            let mut eligible: Vec<(i64, JobId)> = jobs
                .values()
                .filter(|job| task_types.contains(&job.task_type) && job.is_claimable(now))
                .map(|job| (job.available_at, job.id))
                .collect();
            eligible.sort_unstable();
            eligible.truncate(limit);

            let mut claimed = Vec::with_capacity(eligible.len());
            for (_, id) in eligible {
                if let Some(job) = jobs.get_mut(&id) {
                    job.status = JobStatus::InProgress;
                    job.attempts += 1;
                    job.started_at = Some(now);
                    claimed.push(job.clone());
                }
            }
            Ok(claimed)
        }

        async fn record_success(
            &self,
            id: JobId,
            attempt: i32,
            result: Option<serde_json::Value>,
        ) -> Result<bool> {
            self.check_available()?;
            let now = self.clock.now_millis();
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound(format!("job {}", id)))?;
            if job.status != JobStatus::InProgress || job.attempts != attempt {
                return Ok(false);
            }
            job.complete(result, now)?;
            Ok(true)
        }

        async fn record_failure(
            &self,
            id: JobId,
            attempt: i32,
            message: &str,
            retryable: bool,
            policy: &RetryPolicy,
        ) -> Result<FailureOutcome> {
            self.check_available()?;
            let now = self.clock.now_millis();
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound(format!("job {}", id)))?;
            if job.status != JobStatus::InProgress || job.attempts != attempt {
                return Ok(FailureOutcome::Ignored);
            }

            let decision = policy.decide(job.attempts, job.max_attempts, retryable);
            job.apply_failure(&decision, message, now)?;
            Ok(match decision {
                RetryDecision::Retry(delay) => FailureOutcome::Retrying {
                    available_at: job.available_at,
                    delay,
                },
                RetryDecision::Fail => FailureOutcome::Failed,
            })
        }

        async fn reclaim_stalled(
            &self,
            task_types: Option<&[TaskType]>,
            timeout: Duration,
        ) -> Result<ReclaimReport> {
            self.check_available()?;
            let now = self.clock.now_millis();
            let cutoff = millis_before(now, timeout);
            let mut report = ReclaimReport::default();

            for job in self.jobs.lock().unwrap().values_mut() {
                if !matches(task_types, job) || !job.is_stalled(cutoff) {
                    continue;
                }
                if job.attempts_exhausted() {
                    job.status = JobStatus::Failed;
                    job.completed_at = Some(now);
                    job.error_message = Some(STALLED_MESSAGE.to_string());
                    report.failed.push(job.clone());
                } else {
                    job.status = JobStatus::Pending;
                    job.started_at = None;
                    job.available_at = now;
                    report.requeued += 1;
                }
            }
            Ok(report)
        }

        async fn count_by_status(
            &self,
            task_type: Option<&TaskType>,
            status: JobStatus,
        ) -> Result<i64> {
            self.check_available()?;
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|job| job.status == status)
                .filter(|job| task_type.map_or(true, |t| &job.task_type == t))
                .count() as i64)
        }

        async fn status_counts(&self) -> Result<Vec<StatusCount>> {
            self.check_available()?;
            let mut counts: BTreeMap<(String, &'static str), (JobStatus, i64)> = BTreeMap::new();
            for job in self.jobs.lock().unwrap().values() {
                counts
                    .entry((job.task_type.to_string(), job.status.as_str()))
                    .or_insert((job.status, 0))
                    .1 += 1;
            }
            Ok(counts
                .into_iter()
                .map(|((task_type, _), (status, count))| StatusCount {
                    task_type,
                    status,
                    count,
                })
                .collect())
        }
    }
}
