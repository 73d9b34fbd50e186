// Job Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::retry::RetryDecision;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Job ID (database-assigned, monotonic)
pub type JobId = i64;

/// Attempt ceiling applied when the producer does not pick one
pub const DEFAULT_MAX_ATTEMPTS: i32 = 6;

/// Job Status
///
/// `Pending -> InProgress -> {Completed | Pending (retry) | Failed}`.
/// Only the reclaimer moves a stalled `InProgress` job back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Task type tag selecting the handler (e.g. "create_order")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Job Payload (JSON serializable, opaque to the queue)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    /// Serialized payload cut to at most `max_chars` characters, for alerts and logs
    pub fn excerpt(&self, max_chars: usize) -> String {
        let text = self.0.to_string();
        match text.char_indices().nth(max_chars) {
            Some((cut, _)) => format!("{}...", &text[..cut]),
            None => text,
        }
    }
}

/// `now_millis + delay`, or a validation error when it does not fit in epoch ms
pub fn millis_after(now_millis: i64, delay: Duration) -> Result<i64> {
    i64::try_from(delay.as_millis())
        .ok()
        .and_then(|delay_ms| now_millis.checked_add(delay_ms))
        .ok_or_else(|| {
            DomainError::ValidationError(format!("delay of {}s is out of range", delay.as_secs()))
        })
}

/// `now_millis - window`, saturating for windows longer than the epoch range
pub fn millis_before(now_millis: i64, window: Duration) -> i64 {
    now_millis.saturating_sub(i64::try_from(window.as_millis()).unwrap_or(i64::MAX))
}

/// A job as submitted by a producer, before the store assigns an id
#[derive(Debug, Clone)]
pub struct NewJob {
    pub task_type: TaskType,
    pub payload: JobPayload,
    pub delay: Duration,
    pub max_attempts: i32,
}

impl NewJob {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_type: TaskType::new(task_type),
            payload: JobPayload::new(payload),
            delay: Duration::ZERO,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// First moment the job may be claimed, given the insert time
    pub fn available_at(&self, now_millis: i64) -> Result<i64> {
        millis_after(now_millis, self.delay)
    }
}

/// Job Entity
///
/// All timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub task_type: TaskType,
    pub status: JobStatus,

    pub payload: JobPayload,
    pub result: Option<serde_json::Value>,

    pub attempts: i32,
    pub max_attempts: i32,

    pub available_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub error_message: Option<String>,

    pub created_at: i64,
}

impl Job {
    /// Eligible for claiming: pending, due, and attempts left
    pub fn is_claimable(&self, now_millis: i64) -> bool {
        self.status == JobStatus::Pending
            && self.available_at <= now_millis
            && self.attempts < self.max_attempts
    }

    /// In progress since before `cutoff_millis`
    pub fn is_stalled(&self, cutoff_millis: i64) -> bool {
        self.status == JobStatus::InProgress
            && self.started_at.is_some_and(|started| started < cutoff_millis)
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Transition to Completed with explicit timestamp
    pub fn complete(&mut self, result: Option<serde_json::Value>, now_millis: i64) -> Result<()> {
        self.ensure_in_progress(JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.completed_at = Some(now_millis);
        self.result = result;
        Ok(())
    }

    /// Apply a failure outcome decided by the retry policy
    ///
    /// `Retry` puts the job back to pending with its backoff deadline,
    /// `Fail` resolves it permanently.
    pub fn apply_failure(
        &mut self,
        decision: &RetryDecision,
        message: impl Into<String>,
        now_millis: i64,
    ) -> Result<()> {
        let target = match decision {
            RetryDecision::Retry(_) => JobStatus::Pending,
            RetryDecision::Fail => JobStatus::Failed,
        };
        self.ensure_in_progress(target)?;

        match decision {
            RetryDecision::Retry(delay) => {
                self.available_at = millis_after(now_millis, *delay)?;
                self.status = JobStatus::Pending;
                self.started_at = None;
            }
            RetryDecision::Fail => {
                self.status = JobStatus::Failed;
                self.completed_at = Some(now_millis);
            }
        }
        self.error_message = Some(message.into());
        Ok(())
    }

    fn ensure_in_progress(&self, to: JobStatus) -> Result<()> {
        if self.status != JobStatus::InProgress {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn in_progress_job() -> Job {
        Job {
            id: 1,
            task_type: TaskType::new("create_order"),
            status: JobStatus::InProgress,
            payload: JobPayload::new(json!({"ref": "A1"})),
            result: None,
            attempts: 1,
            max_attempts: 3,
            available_at: 1_000,
            started_at: Some(2_000),
            completed_at: None,
            error_message: None,
            created_at: 1_000,
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_claimable_requires_due_pending_with_attempts_left() {
        let mut job = in_progress_job();
        job.status = JobStatus::Pending;
        job.started_at = None;

        assert!(job.is_claimable(1_000));
        assert!(!job.is_claimable(999), "future available_at is not eligible");

        job.attempts = 3;
        assert!(!job.is_claimable(5_000), "exhausted job is not eligible");

        job.attempts = 1;
        job.status = JobStatus::Completed;
        assert!(!job.is_claimable(5_000));
    }

    #[test]
    fn test_retry_resets_to_pending_with_backoff() {
        let mut job = in_progress_job();
        job.apply_failure(&RetryDecision::Retry(Duration::from_secs(5)), "timeout", 10_000)
            .unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.started_at, None);
        assert_eq!(job.available_at, 15_000);
        assert_eq!(job.attempts, 1, "failure never touches attempts");
        assert_eq!(job.error_message.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_fail_is_terminal() {
        let mut job = in_progress_job();
        job.apply_failure(&RetryDecision::Fail, "bad address", 10_000)
            .unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.completed_at, Some(10_000));
        assert!(job.status.is_terminal());

        // A resolved job cannot be resolved again
        assert!(job.complete(None, 11_000).is_err());
    }

    #[test]
    fn test_available_at_rejects_out_of_range_delay() {
        let job = NewJob::new("create_order", json!({})).with_delay(Duration::from_secs(30));
        assert_eq!(job.available_at(1_000).unwrap(), 31_000);

        let job = NewJob::new("create_order", json!({})).with_delay(Duration::from_secs(u64::MAX));
        assert!(matches!(
            job.available_at(1_000),
            Err(DomainError::ValidationError(_))
        ));

        assert_eq!(millis_before(10_000, Duration::from_secs(4)), 6_000);
        assert_eq!(millis_before(10_000, Duration::from_secs(u64::MAX)), 10_000 - i64::MAX);

        // Fits in u64 millis but not once added to the clock
        let edge = Duration::from_millis(i64::MAX as u64);
        assert!(millis_after(0, edge).is_ok());
        assert!(millis_after(1, edge).is_err());
    }

    #[test]
    fn test_complete_stores_result() {
        let mut job = in_progress_job();
        job.complete(Some(json!({"tracking": "T1"})), 3_000).unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"tracking": "T1"})));
        assert_eq!(job.completed_at, Some(3_000));
    }

    #[test]
    fn test_stalled_detection() {
        let job = in_progress_job();
        assert!(job.is_stalled(2_001));
        assert!(!job.is_stalled(2_000));
    }

    #[test]
    fn test_payload_excerpt_truncates_on_char_boundary() {
        let payload = JobPayload::new(json!({"name": "배송주문배송주문"}));
        let excerpt = payload.excerpt(12);
        assert!(excerpt.ends_with("..."));
        assert_eq!(excerpt.trim_end_matches("...").chars().count(), 12);

        let short = JobPayload::new(json!({"a": 1}));
        assert_eq!(short.excerpt(200), r#"{"a":1}"#);
    }
}
