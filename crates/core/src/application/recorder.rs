// Outcome Recorder - writes handler results back to the job store
use crate::domain::{Job, RetryPolicy};
use crate::error::Result;
use crate::port::{FailureOutcome, JobRepository};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome recorder
///
/// Moves in-progress jobs to completed, back to pending with backoff,
/// or to failed. The retry decision comes from the shared `RetryPolicy`.
///
/// Outcomes are written against the claim the caller holds: the job as
/// returned by `claim_batch`. Once that claim is reclaimed and handed to
/// another worker, its outcome is dropped.
pub struct OutcomeRecorder {
    job_repo: Arc<dyn JobRepository>,
    retry_policy: RetryPolicy,
}

impl OutcomeRecorder {
    pub fn new(job_repo: Arc<dyn JobRepository>, retry_policy: RetryPolicy) -> Self {
        Self {
            job_repo,
            retry_policy,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Record a successful run
    ///
    /// Returns `false` if the claim is no longer current (already recorded,
    /// or reclaimed and picked up elsewhere).
    pub async fn record_success(
        &self,
        claimed: &Job,
        result: Option<serde_json::Value>,
    ) -> Result<bool> {
        let job_id = claimed.id;
        let recorded = self
            .job_repo
            .record_success(job_id, claimed.attempts, result)
            .await?;
        if recorded {
            info!(job_id = job_id, "Job completed");
        } else {
            warn!(
                job_id = job_id,
                attempt = claimed.attempts,
                "Success not recorded: claim no longer current"
            );
        }
        Ok(recorded)
    }

    /// Record a failed run
    pub async fn record_failure(
        &self,
        claimed: &Job,
        message: &str,
        retryable: bool,
    ) -> Result<FailureOutcome> {
        let job_id = claimed.id;
        let outcome = self
            .job_repo
            .record_failure(job_id, claimed.attempts, message, retryable, &self.retry_policy)
            .await?;

        match &outcome {
            FailureOutcome::Retrying {
                available_at,
                delay,
            } => info!(
                job_id = job_id,
                delay_ms = delay.as_millis() as u64,
                available_at = available_at,
                error = %message,
                "Retrying job after failure"
            ),
            FailureOutcome::Failed => warn!(
                job_id = job_id,
                retryable = retryable,
                error = %message,
                "Job failed permanently"
            ),
            FailureOutcome::Ignored => warn!(
                job_id = job_id,
                attempt = claimed.attempts,
                error = %message,
                "Failure not recorded: claim no longer current"
            ),
        }
        Ok(outcome)
    }
}
