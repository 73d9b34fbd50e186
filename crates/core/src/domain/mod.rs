// Domain Layer - Pure queue semantics and entities

pub mod error;
pub mod job;
pub mod retry;
pub mod worker;

// Re-exports
pub use error::DomainError;
pub use job::{
    millis_after, millis_before, Job, JobId, JobPayload, JobStatus, NewJob, TaskType,
    DEFAULT_MAX_ATTEMPTS,
};
pub use retry::{RetryDecision, RetryPolicy};
pub use worker::{WorkerConfig, WorkerStats};
