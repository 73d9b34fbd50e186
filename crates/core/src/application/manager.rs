// Worker Manager - owns the set of workers in one process
use crate::application::worker::Worker;
use crate::domain::WorkerStats;
use futures::future::join_all;
use std::sync::Arc;
use tracing::info;

/// Starts, stops and reports on a set of workers
#[derive(Default)]
pub struct WorkerManager {
    workers: Vec<Arc<Worker>>,
}

impl WorkerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, worker: Arc<Worker>) {
        self.workers.push(worker);
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    pub fn start_all(&self) {
        for worker in &self.workers {
            worker.start();
        }
        info!(workers = self.workers.len(), "All workers started");
    }

    /// Stop every worker concurrently and wait for their in-flight jobs
    pub async fn stop_all(&self) {
        join_all(self.workers.iter().map(|worker| worker.stop())).await;
        info!(workers = self.workers.len(), "All workers stopped");
    }

    pub fn stats(&self) -> Vec<WorkerStats> {
        self.workers.iter().map(|worker| worker.stats()).collect()
    }

    /// In-flight jobs across all workers
    pub fn total_active(&self) -> usize {
        self.workers.iter().map(|worker| worker.active_count()).sum()
    }
}
