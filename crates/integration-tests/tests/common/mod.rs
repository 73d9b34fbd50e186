//! Shared fixtures for the integration tests

#![allow(dead_code)]

use courier_core::application::{HandlerRegistry, Worker};
use courier_core::domain::{RetryPolicy, WorkerConfig};
use courier_core::port::{Notifier, TimeProvider};
use courier_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Fresh in-memory job store
pub async fn memory_store(clock: Arc<dyn TimeProvider>) -> Arc<SqliteJobRepository> {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(SqliteJobRepository::new(pool, clock))
}

/// Job store on a database file, one pool per call
///
/// Several stores opened on the same file behave like separate processes.
pub async fn file_store(path: &Path, clock: Arc<dyn TimeProvider>) -> Arc<SqliteJobRepository> {
    let pool = create_pool(&format!("sqlite://{}", path.display()))
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(SqliteJobRepository::new(pool, clock))
}

pub fn worker(
    config: WorkerConfig,
    repo: Arc<SqliteJobRepository>,
    registry: &HandlerRegistry,
    notifier: Arc<dyn Notifier>,
) -> Arc<Worker> {
    Arc::new(Worker::new(config, repo, registry, RetryPolicy::default(), notifier).unwrap())
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
