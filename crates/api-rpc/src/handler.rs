//! RPC Method Handlers

use crate::error::to_rpc_error;
use crate::types::{EnqueueRequest, EnqueueResponse, GetJobRequest, StatsResponse};
use courier_core::application::{EnqueueService, WorkerManager};
use courier_core::domain::{Job, JobStatus};
use courier_core::error::AppError;
use courier_core::port::JobRepository;
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use std::time::Instant;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    enqueue: EnqueueService,
    job_repo: Arc<dyn JobRepository>,
    manager: Arc<WorkerManager>,
    start_time: Instant,
}

impl RpcHandler {
    pub fn new(
        enqueue: EnqueueService,
        job_repo: Arc<dyn JobRepository>,
        manager: Arc<WorkerManager>,
    ) -> Self {
        Self {
            enqueue,
            job_repo,
            manager,
            start_time: Instant::now(),
        }
    }

    /// jobs.enqueue.v1
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<EnqueueResponse, ErrorObjectOwned> {
        let job_id = self.enqueue.enqueue(req).await.map_err(to_rpc_error)?;

        Ok(EnqueueResponse {
            job_id,
            status: JobStatus::Pending,
        })
    }

    /// jobs.get.v1
    pub async fn get_job(&self, req: GetJobRequest) -> Result<Job, ErrorObjectOwned> {
        self.job_repo
            .find_by_id(req.job_id)
            .await
            .map_err(to_rpc_error)?
            .ok_or_else(|| to_rpc_error(AppError::NotFound(format!("Job {} not found", req.job_id))))
    }

    /// admin.stats.v1
    pub async fn stats(&self) -> Result<StatsResponse, ErrorObjectOwned> {
        let jobs = self.job_repo.status_counts().await.map_err(to_rpc_error)?;

        Ok(StatsResponse {
            jobs,
            workers: self.manager.stats(),
            total_active: self.manager.total_active(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        })
    }
}
