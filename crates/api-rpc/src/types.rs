//! RPC Request/Response Types

use courier_core::domain::{JobId, JobStatus, WorkerStats};
use courier_core::port::StatusCount;
use serde::{Deserialize, Serialize};

/// jobs.enqueue.v1 params
pub use courier_core::application::EnqueueRequest;

/// jobs.enqueue.v1 result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// jobs.get.v1 - Fetch one job (result is the full job record)
#[derive(Debug, Serialize, Deserialize)]
pub struct GetJobRequest {
    pub job_id: JobId,
}

/// admin.stats.v1 result (takes no params)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub jobs: Vec<StatusCount>,
    pub workers: Vec<WorkerStats>,
    pub total_active: usize,
    pub uptime_seconds: u64,
}
