// Migration Runner

use courier_core::error::{AppError, Result};
use sqlx::SqlitePool;
use tracing::info;

/// Ordered schema migrations: (version, name, sql)
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "create jobs",
    include_str!("../migrations/001_create_jobs.sql"),
)];

fn db_err(e: sqlx::Error) -> AppError {
    AppError::Database(format!("migration failed: {}", e))
}

/// Run database migrations
///
/// Each migration runs in its own transaction together with its
/// `schema_version` row, so a failed migration leaves no partial schema.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(db_err)?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(pool)
            .await
            .map_err(db_err)?;

    info!(current_version, "Current schema version");

    for &(version, name, sql) in MIGRATIONS {
        if version <= current_version {
            continue;
        }
        info!(version, name, "Applying migration");
        apply_migration(pool, version, name, sql).await?;
    }

    info!("All migrations applied successfully");
    Ok(())
}

/// Apply a single migration SQL file
async fn apply_migration(pool: &SqlitePool, version: i64, name: &str, sql: &str) -> Result<()> {
    let mut tx = pool.begin().await.map_err(db_err)?;

    for statement in split_statements(sql) {
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
    }

    sqlx::query(
        "INSERT INTO schema_version (version, name, applied_at)
         VALUES (?, ?, CAST(strftime('%s', 'now') AS INTEGER) * 1000)",
    )
    .bind(version)
    .bind(name)
    .execute(&mut *tx)
    .await
    .map_err(db_err)?;

    tx.commit().await.map_err(db_err)?;
    Ok(())
}

/// Split a migration file on `;`, dropping `--` comment lines
fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(|statement| {
            statement
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|statement| !statement.is_empty())
        .collect()
}
