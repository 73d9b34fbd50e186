// SQLite Connection Pool Setup

use courier_core::error::{AppError, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Pool size for file databases
const MAX_CONNECTIONS: u32 = 10;

/// How long a writer waits for the database lock before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Create SQLite connection pool
///
/// File databases run in WAL mode with a multi-connection pool. An in-memory
/// database only exists inside its connection, so it gets exactly one
/// connection that is never recycled.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let in_memory = is_in_memory(database_url);

    let mut options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::Config(format!("invalid database url: {}", e)))?
        .busy_timeout(BUSY_TIMEOUT)
        .create_if_missing(true);
    if !in_memory {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS)
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    debug!(in_memory, "SQLite pool ready");
    Ok(pool)
}
