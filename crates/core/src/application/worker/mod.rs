// Worker - bounded-concurrency poll loop over a set of task types

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::alert::spawn_failure_alert;
use crate::application::reclaimer::StuckJobReclaimer;
use crate::application::recorder::OutcomeRecorder;
use crate::application::registry::{HandlerRegistry, RegisteredHandler};
use crate::domain::{Job, RetryPolicy, TaskType, WorkerConfig, WorkerStats};
use crate::error::Result;
use crate::port::{
    FailureNotice, FailureOutcome, GroupedTaskHandler, HandlerError, HandlerResult,
    JobRepository, Notifier, TaskHandler,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

struct RunningLoop {
    shutdown: ShutdownSender,
    handle: JoinHandle<()>,
}

/// Everything a spawned job task needs to resolve its job
#[derive(Clone)]
struct Completion {
    worker: Arc<str>,
    recorder: Arc<OutcomeRecorder>,
    notifier: Arc<dyn Notifier>,
}

impl Completion {
    async fn finish(&self, job: &Job, outcome: HandlerResult) {
        match outcome {
            Ok(result) => {
                if let Err(e) = self.recorder.record_success(job, result).await {
                    // Left in progress; the reclaimer picks it up after the stale timeout
                    error!(worker = %self.worker, job_id = job.id, error = %e, "Failed to record success");
                }
            }
            Err(err) => {
                let message = err.to_string();
                match self
                    .recorder
                    .record_failure(job, &message, err.is_retryable())
                    .await
                {
                    Ok(FailureOutcome::Failed) => {
                        spawn_failure_alert(
                            self.notifier.clone(),
                            FailureNotice::from_job(job, message),
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(worker = %self.worker, job_id = job.id, error = %e, "Failed to record failure")
                    }
                }
            }
        }
    }
}

/// Worker for one or more task types
///
/// At most `concurrency_limit` jobs run at once: each in-flight job holds one
/// semaphore permit from claim until its outcome is recorded. A poll cycle
/// only claims as many jobs as there are free permits.
pub struct Worker {
    config: WorkerConfig,
    job_repo: Arc<dyn JobRepository>,
    reclaimer: StuckJobReclaimer,
    handlers: HashMap<TaskType, RegisteredHandler>,
    completion: Completion,
    slots: Arc<Semaphore>,
    running: Mutex<Option<RunningLoop>>,
}

impl Worker {
    /// Build a worker; fails if the config is invalid or a task type has no handler
    pub fn new(
        config: WorkerConfig,
        job_repo: Arc<dyn JobRepository>,
        registry: &HandlerRegistry,
        retry_policy: RetryPolicy,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        config.validate()?;
        let handlers = registry.resolve(&config.task_types)?;

        let reclaimer = StuckJobReclaimer::new(job_repo.clone(), Some(config.stale_timeout))
            .with_notifier(notifier.clone());
        let completion = Completion {
            worker: Arc::from(config.name.as_str()),
            recorder: Arc::new(OutcomeRecorder::new(job_repo.clone(), retry_policy)),
            notifier,
        };

        Ok(Self {
            slots: Arc::new(Semaphore::new(config.concurrency_limit)),
            config,
            job_repo,
            reclaimer,
            handlers,
            completion,
            running: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Start the poll loop (no-op if already running)
    pub fn start(self: &Arc<Self>) {
        let mut running = self.lock_running();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!(worker = %self.config.name, "Worker already running");
            return;
        }

        let (tx, token) = shutdown_channel();
        let handle = tokio::spawn(Arc::clone(self).run(token));
        *running = Some(RunningLoop {
            shutdown: tx,
            handle,
        });
    }

    /// Stop polling and wait for in-flight jobs to finish
    ///
    /// Jobs already handed to handlers are never cancelled.
    pub async fn stop(&self) {
        let running = self.lock_running().take();
        if let Some(RunningLoop { shutdown, handle }) = running {
            shutdown.shutdown();
            if let Err(e) = handle.await {
                error!(worker = %self.config.name, error = %e, "Poll loop ended abnormally");
            }
        }
        self.wait_idle().await;
        info!(worker = %self.config.name, "Worker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lock_running()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Jobs currently claimed and not yet recorded
    pub fn active_count(&self) -> usize {
        self.config
            .concurrency_limit
            .saturating_sub(self.slots.available_permits())
    }

    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            name: self.config.name.clone(),
            task_types: self
                .config
                .task_types
                .iter()
                .map(|t| t.to_string())
                .collect(),
            concurrency_limit: self.config.concurrency_limit,
            active_count: self.active_count(),
            free_slots: self.free_slots(),
            running: self.is_running(),
        }
    }

    /// Wait until no job of this worker is in flight
    pub async fn wait_idle(&self) {
        // The semaphore is never closed, so this only fails on an impossible permit count
        if let Ok(all) = self
            .slots
            .acquire_many(self.config.concurrency_limit as u32)
            .await
        {
            drop(all);
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: ShutdownToken) {
        info!(
            worker = %self.config.name,
            task_types = ?self.config.task_types,
            concurrency_limit = self.config.concurrency_limit,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Worker started"
        );

        // First tick fires immediately
        let mut tick = interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.wait() => break,
            }
            if shutdown.is_shutdown() {
                break;
            }

            match self.poll_once().await {
                Ok(0) => {}
                Ok(claimed) => debug!(worker = %self.config.name, claimed, "Poll cycle dispatched jobs"),
                Err(e) => error!(worker = %self.config.name, error = %e, "Poll cycle failed"),
            }
        }

        info!(worker = %self.config.name, "Worker poll loop exited");
    }

    /// Run one poll cycle and return the number of jobs dispatched
    ///
    /// Reclaims stalled jobs, claims up to the number of free slots and hands
    /// each job (or group) to its own task. Returns without waiting for the
    /// handlers. Store errors abort the cycle.
    pub async fn poll_once(&self) -> Result<usize> {
        self.reclaimer
            .reclaim(Some(self.config.task_types.as_slice()))
            .await?;

        let mut permits = self.reserve_slots();
        if permits.is_empty() {
            debug!(worker = %self.config.name, "No free slots, skipping claim");
            return Ok(0);
        }

        let jobs = self
            .job_repo
            .claim_batch(&self.config.task_types, permits.len())
            .await?;
        // Unused reservations go back to the pool
        permits.truncate(jobs.len());
        if jobs.is_empty() {
            return Ok(0);
        }

        let claimed = jobs.len();
        info!(worker = %self.config.name, claimed, "Claimed jobs");

        type Group = (Arc<dyn GroupedTaskHandler>, Vec<Job>, Vec<OwnedSemaphorePermit>);
        let mut groups: BTreeMap<(TaskType, String), Group> = BTreeMap::new();

        for (job, permit) in jobs.into_iter().zip(permits) {
            match self.handlers.get(&job.task_type) {
                Some(RegisteredHandler::Single(handler)) => {
                    self.dispatch_single(handler.clone(), job, permit);
                }
                Some(RegisteredHandler::Grouped(handler)) => {
                    let key = handler.group_key(&job.payload);
                    let group = groups
                        .entry((job.task_type.clone(), key))
                        .or_insert_with(|| (handler.clone(), Vec::new(), Vec::new()));
                    group.1.push(job);
                    group.2.push(permit);
                }
                None => self.dispatch_unhandled(job, permit),
            }
        }

        for ((_, key), (handler, jobs, permits)) in groups {
            self.dispatch_group(handler, key, jobs, permits);
        }

        Ok(claimed)
    }

    fn reserve_slots(&self) -> Vec<OwnedSemaphorePermit> {
        let mut permits = Vec::new();
        while let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() {
            permits.push(permit);
        }
        permits
    }

    fn dispatch_single(
        &self,
        handler: Arc<dyn TaskHandler>,
        job: Job,
        permit: OwnedSemaphorePermit,
    ) {
        let completion = self.completion.clone();
        tokio::spawn(async move {
            debug!(worker = %completion.worker, job_id = job.id, task_type = %job.task_type, "Running job");

            let payload = job.payload.clone();
            let outcome = match tokio::spawn(async move { handler.handle(&payload).await }).await
            {
                Ok(outcome) => outcome,
                Err(e) => Err(handler_crash(&completion.worker, &[job.id], e)),
            };

            completion.finish(&job, outcome).await;
            drop(permit);
        });
    }

    fn dispatch_group(
        &self,
        handler: Arc<dyn GroupedTaskHandler>,
        key: String,
        jobs: Vec<Job>,
        permits: Vec<OwnedSemaphorePermit>,
    ) {
        let completion = self.completion.clone();
        tokio::spawn(async move {
            debug!(worker = %completion.worker, group = %key, size = jobs.len(), "Running job group");

            let jobs = Arc::new(jobs);
            let batch = Arc::clone(&jobs);
            let results =
                match tokio::spawn(async move { handler.handle_group(&batch).await }).await {
                    Ok(results) => results,
                    Err(e) => {
                        let ids: Vec<_> = jobs.iter().map(|j| j.id).collect();
                        vec![Err(handler_crash(&completion.worker, &ids, e)); jobs.len()]
                    }
                };

            if results.len() != jobs.len() {
                warn!(
                    worker = %completion.worker,
                    group = %key,
                    expected = jobs.len(),
                    got = results.len(),
                    "Grouped handler result count mismatch"
                );
            }

            let mut results = results.into_iter();
            for job in jobs.iter() {
                let outcome = results
                    .next()
                    .unwrap_or_else(|| Err(HandlerError::retryable(MISSING_GROUP_RESULT)));
                completion.finish(job, outcome).await;
            }
            drop(permits);
        });
    }

    fn dispatch_unhandled(&self, job: Job, permit: OwnedSemaphorePermit) {
        let completion = self.completion.clone();
        tokio::spawn(async move {
            let err = HandlerError::permanent(format!(
                "no handler registered for task type {}",
                job.task_type
            ));
            completion.finish(&job, Err(err)).await;
            drop(permit);
        });
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<RunningLoop>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Turn a crashed handler task into a retryable failure
fn handler_crash(worker: &str, job_ids: &[i64], err: JoinError) -> HandlerError {
    let detail = if err.is_panic() {
        let panic = err.into_panic();
        panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string())
    } else {
        "handler task cancelled".to_string()
    };

    error!(worker = %worker, job_ids = ?job_ids, panic = %detail, "Handler panicked");
    HandlerError::retryable(format!("{}: {}", PANIC_MESSAGE_PREFIX, detail))
}
