//! Courier daemon - main entry point
//!
//! Wires the job store, workers, reclaimer and JSON-RPC server together and
//! runs them until Ctrl+C.

mod handlers;
mod logging;
mod notifier;
mod settings;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use courier_api_rpc::{RpcHandler, RpcServer};
use courier_core::application::{
    shutdown_channel, EnqueueService, HandlerRegistry, StuckJobReclaimer, Worker, WorkerManager,
};
use courier_core::port::time_provider::SystemTimeProvider;
use courier_core::port::{JobRepository, LogNotifier, Notifier, TimeProvider};
use courier_infra_postgres::PgJobRepository;
use courier_infra_sqlite::SqliteJobRepository;
use handlers::HttpTaskHandler;
use notifier::WebhookNotifier;
use settings::{DatabaseTarget, Settings};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let settings = Settings::load()?;
    let _log_guard = logging::init(&settings.log)?;

    info!("Courier v{} starting...", VERSION);

    // 2. Job store
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let job_repo = open_job_store(&settings, time_provider).await?;

    // 3. Alerts, handlers, workers
    let notifier: Arc<dyn Notifier> = match &settings.alert_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.as_str())?),
        None => {
            info!("No alert webhook configured, failed jobs are only logged");
            Arc::new(LogNotifier)
        }
    };

    let mut registry = HandlerRegistry::new();
    for handler in &settings.handlers {
        let http = HttpTaskHandler::new(
            handler.url.as_str(),
            std::time::Duration::from_secs(handler.timeout_secs),
        )?;
        registry.register(handler.task_type.as_str(), Arc::new(http));
        info!(task_type = %handler.task_type, url = %handler.url, "Registered HTTP handler");
    }

    let retry_policy = settings.retry_policy();
    let mut manager = WorkerManager::new();
    for worker_config in settings.worker_configs() {
        let worker = Worker::new(
            worker_config,
            job_repo.clone(),
            &registry,
            retry_policy.clone(),
            notifier.clone(),
        )
        .context("Worker construction failed")?;
        manager.add(Arc::new(worker));
    }
    if manager.workers().is_empty() {
        warn!("No workers configured, jobs will be accepted but not processed");
    }
    let manager = Arc::new(manager);

    // 4. Startup recovery: anything in progress past the timeout was
    // orphaned by a previous process
    let reclaimer = StuckJobReclaimer::new(job_repo.clone(), Some(settings.stale_timeout()))
        .with_notifier(notifier.clone());
    match reclaimer.reclaim(None).await {
        Ok(report) => info!(
            requeued = report.requeued,
            failed = report.failed.len(),
            "Startup recovery completed"
        ),
        Err(e) => error!(error = %e, "Startup recovery failed"),
    }

    // 5. JSON-RPC server
    let rpc_handler = RpcHandler::new(
        EnqueueService::new(job_repo.clone(), retry_policy),
        job_repo.clone(),
        manager.clone(),
    );
    let (rpc_handle, rpc_addr) = RpcServer::new(settings.rpc.clone(), rpc_handler)
        .start()
        .await
        .context("RPC server start failed")?;
    info!(addr = %rpc_addr, "JSON-RPC server listening");

    // 6. Workers and the standalone reclaim sweep
    manager.start_all();

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let reclaimer_handle = tokio::spawn(reclaimer.run(settings.reclaim_interval(), shutdown_rx));

    info!("System ready. Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining in-flight jobs...");

    // 8. Graceful shutdown: stop intake first, then let running jobs finish
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    shutdown_tx.shutdown();
    if let Err(e) = reclaimer_handle.await {
        warn!(error = %e, "Reclaimer task ended abnormally");
    }

    let timeout = settings.shutdown_timeout();
    if tokio::time::timeout(timeout, manager.stop_all()).await.is_err() {
        warn!(
            timeout_secs = timeout.as_secs(),
            in_flight = manager.total_active(),
            "Shutdown timed out, remaining jobs will be reclaimed on next start"
        );
    }
    rpc_handle.stopped().await;

    info!("Shutdown complete.");
    Ok(())
}

/// Connect to the configured backend and bring its schema up to date
async fn open_job_store(
    settings: &Settings,
    time_provider: Arc<dyn TimeProvider>,
) -> Result<Arc<dyn JobRepository>> {
    match settings.database_target() {
        DatabaseTarget::Postgres(url) => {
            info!("Initializing PostgreSQL job store...");
            let pool = courier_infra_postgres::create_pool(&url)
                .await
                .context("PostgreSQL pool creation failed")?;
            courier_infra_postgres::run_migrations(&pool)
                .await
                .context("Migration failed")?;
            Ok(Arc::new(PgJobRepository::new(pool, time_provider)))
        }
        DatabaseTarget::Sqlite { url, path } => {
            if let Some(parent) = path.as_deref().and_then(|p| p.parent()) {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Cannot create database directory {}", parent.display())
                    })?;
                }
            }
            info!(url = %url, "Initializing SQLite job store...");
            let pool = courier_infra_sqlite::create_pool(&url)
                .await
                .context("SQLite pool creation failed")?;
            courier_infra_sqlite::run_migrations(&pool)
                .await
                .context("Migration failed")?;
            Ok(Arc::new(SqliteJobRepository::new(pool, time_provider)))
        }
    }
}
