// Enqueue Use Case - the only write path into the job store from outside

#[cfg(test)]
mod enqueue_test;

use crate::domain::{JobId, NewJob, RetryPolicy};
use crate::error::{AppError, Result};
use crate::port::JobRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Maximum task type length
pub const MAX_TASK_TYPE_LEN: usize = 64;

/// Highest accepted per-job attempt ceiling
pub const MAX_ATTEMPTS_LIMIT: i32 = 100;

/// Maximum JSON nesting accepted in a payload
pub const MAX_PAYLOAD_DEPTH: usize = 32;

/// Longest accepted enqueue delay: one year
pub const MAX_DELAY_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Enqueue request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub task_type: String,
    pub payload: serde_json::Value,

    #[serde(default)]
    pub delay_seconds: u64,

    #[serde(default)]
    pub max_attempts: Option<i32>,
}

impl EnqueueRequest {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            delay_seconds: 0,
            max_attempts: None,
        }
    }
}

/// Validate an enqueue request before it touches the store
pub fn validate_request(req: &EnqueueRequest) -> Result<()> {
    if req.task_type.is_empty() {
        return Err(AppError::Validation("task_type cannot be empty".to_string()));
    }
    if req.task_type.len() > MAX_TASK_TYPE_LEN {
        return Err(AppError::Validation(format!(
            "task_type too long ({} > {} chars)",
            req.task_type.len(),
            MAX_TASK_TYPE_LEN
        )));
    }
    if !req
        .task_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(AppError::Validation(format!(
            "task_type must be alphanumeric with _ - . only: {}",
            req.task_type
        )));
    }
    if let Some(max_attempts) = req.max_attempts {
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&max_attempts) {
            return Err(AppError::Validation(format!(
                "max_attempts {} out of range (1..={})",
                max_attempts, MAX_ATTEMPTS_LIMIT
            )));
        }
    }
    if req.delay_seconds > MAX_DELAY_SECONDS {
        return Err(AppError::Validation(format!(
            "delay_seconds {} exceeds the maximum of {}",
            req.delay_seconds, MAX_DELAY_SECONDS
        )));
    }
    if json_depth(&req.payload) > MAX_PAYLOAD_DEPTH {
        return Err(AppError::Validation(format!(
            "payload too deeply nested (max depth {})",
            MAX_PAYLOAD_DEPTH
        )));
    }
    Ok(())
}

fn json_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        serde_json::Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Enqueue Service
///
/// Producers (RPC handlers, cron triggers, other task handlers) schedule work here.
/// Duplicate submissions are never coalesced; idempotency keys are the caller's job.
pub struct EnqueueService {
    job_repo: Arc<dyn JobRepository>,
    retry_policy: RetryPolicy,
}

impl EnqueueService {
    pub fn new(job_repo: Arc<dyn JobRepository>, retry_policy: RetryPolicy) -> Self {
        Self {
            job_repo,
            retry_policy,
        }
    }

    /// Enqueue a new job, returning its id
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<JobId> {
        validate_request(&req)?;

        let max_attempts = req
            .max_attempts
            .unwrap_or(self.retry_policy.default_max_attempts);
        let job = NewJob::new(req.task_type, req.payload)
            .with_delay(Duration::from_secs(req.delay_seconds))
            .with_max_attempts(max_attempts);

        let job_id = self.job_repo.insert(&job).await?;

        info!(
            job_id = job_id,
            task_type = %job.task_type,
            delay_seconds = req.delay_seconds,
            max_attempts = max_attempts,
            "Job enqueued"
        );
        Ok(job_id)
    }
}
