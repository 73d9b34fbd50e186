// Port Layer - Interfaces for external dependencies

pub mod job_repository;
pub mod notifier;
pub mod task_handler;
pub mod time_provider; // For deterministic testing

// Re-exports
pub use job_repository::{FailureOutcome, JobRepository, ReclaimReport, StatusCount};
pub use notifier::{FailureNotice, LogNotifier, Notifier, NotifyError};
pub use task_handler::{
    GroupedTaskHandler, HandlerError, HandlerResult, Task, TaskHandler, TypedHandler,
};
pub use time_provider::TimeProvider;
