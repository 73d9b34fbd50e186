// Notifier Port
// Out-of-band alerts for jobs that failed for good

use crate::domain::{Job, JobId};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Maximum payload characters carried in an alert
pub const PAYLOAD_EXCERPT_CHARS: usize = 200;

/// Notification errors (logged by the caller, never fatal to the queue)
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Alert content for a permanently failed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureNotice {
    pub job_id: JobId,
    pub task_type: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub error: String,
    pub payload_excerpt: String,
}

impl FailureNotice {
    pub fn from_job(job: &Job, error: impl Into<String>) -> Self {
        Self {
            job_id: job.id,
            task_type: job.task_type.to_string(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            error: error.into(),
            payload_excerpt: job.payload.excerpt(PAYLOAD_EXCERPT_CHARS),
        }
    }

    /// One-line human readable summary (chat message body)
    pub fn summary(&self) -> String {
        format!(
            "Job {} ({}) failed after {}/{} attempts: {} | payload: {}",
            self.job_id,
            self.task_type,
            self.attempts,
            self.max_attempts,
            self.error,
            self.payload_excerpt
        )
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_failure(&self, notice: &FailureNotice) -> Result<(), NotifyError>;
}

/// Notifier that only writes the alert to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_failure(&self, notice: &FailureNotice) -> Result<(), NotifyError> {
        tracing::error!(
            job_id = notice.job_id,
            task_type = %notice.task_type,
            attempts = notice.attempts,
            error = %notice.error,
            payload = %notice.payload_excerpt,
            "Job permanently failed"
        );
        Ok(())
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Records every notice; optionally fails delivery
    #[derive(Default)]
    pub struct RecordingNotifier {
        notices: Mutex<Vec<FailureNotice>>,
        fail_delivery: bool,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        /// Notifier whose channel is down: records, then returns an error
        pub fn failing() -> Self {
            Self {
                notices: Mutex::new(Vec::new()),
                fail_delivery: true,
            }
        }

        pub fn notices(&self) -> Vec<FailureNotice> {
            self.notices.lock().unwrap().clone()
        }

        pub fn count(&self) -> usize {
            self.notices.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_failure(&self, notice: &FailureNotice) -> Result<(), NotifyError> {
            self.notices.lock().unwrap().push(notice.clone());
            if self.fail_delivery {
                return Err(NotifyError::Delivery("channel unavailable".to_string()));
            }
            Ok(())
        }
    }
}
