// Worker configuration and stats

use crate::domain::error::{DomainError, Result};
use crate::domain::job::TaskType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default interval between poll cycles (5s)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default age after which an in-progress job counts as stalled (30 minutes)
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    pub task_types: Vec<TaskType>,
    pub concurrency_limit: usize,
    pub poll_interval: Duration,
    pub stale_timeout: Duration,
}

impl WorkerConfig {
    pub fn new(
        name: impl Into<String>,
        task_types: impl IntoIterator<Item = impl Into<String>>,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            name: name.into(),
            task_types: task_types
                .into_iter()
                .map(|t| TaskType::new(t.into()))
                .collect(),
            concurrency_limit,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_timeout: DEFAULT_STALE_TIMEOUT,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stale_timeout(mut self, stale_timeout: Duration) -> Self {
        self.stale_timeout = stale_timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::InvalidWorkerConfig(
                "worker name cannot be empty".to_string(),
            ));
        }
        if self.task_types.is_empty() {
            return Err(DomainError::InvalidWorkerConfig(format!(
                "worker {} has no task types",
                self.name
            )));
        }
        if self.concurrency_limit == 0 {
            return Err(DomainError::InvalidWorkerConfig(format!(
                "worker {} needs a concurrency limit of at least 1",
                self.name
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(DomainError::InvalidWorkerConfig(format!(
                "worker {} needs a non-zero poll interval",
                self.name
            )));
        }
        Ok(())
    }
}

/// Point-in-time utilization of one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub name: String,
    pub task_types: Vec<String>,
    pub concurrency_limit: usize,
    pub active_count: usize,
    pub free_slots: usize,
    pub running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = WorkerConfig::new("orders", ["create_order"], 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_task_types() {
        let config = WorkerConfig::new("orders", Vec::<String>::new(), 2);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("no task types"));
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::new("tracking", ["tracking_number", "track_other_order"], 4);
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.stale_timeout, DEFAULT_STALE_TIMEOUT);
        assert_eq!(config.task_types[1].as_str(), "track_other_order");
    }
}
