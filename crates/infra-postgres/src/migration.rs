// Migration Runner

use courier_core::error::{AppError, Result};
use sqlx::PgPool;
use tracing::info;

/// Ordered schema migrations: (version, name, sql)
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "create jobs",
    include_str!("../migrations/001_create_jobs.sql"),
)];

/// Serializes concurrent migration runs (several daemons starting at once)
const MIGRATION_LOCK_KEY: i64 = 0x636f_7572_6965;

fn db_err(e: sqlx::Error) -> AppError {
    AppError::Database(format!("migration failed: {}", e))
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    let mut tx = pool.begin().await.map_err(db_err)?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version BIGINT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at BIGINT NOT NULL
        )",
    )
    .execute(&mut *tx)
    .await
    .map_err(db_err)?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0)::BIGINT FROM schema_version")
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

    info!(current_version, "Current schema version");

    for &(version, name, sql) in MIGRATIONS {
        if version <= current_version {
            continue;
        }
        info!(version, name, "Applying migration");

        for statement in split_statements(sql) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        sqlx::query(
            "INSERT INTO schema_version (version, name, applied_at)
             VALUES ($1, $2, (EXTRACT(EPOCH FROM now()) * 1000)::BIGINT)",
        )
        .bind(version)
        .bind(name)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
    }

    tx.commit().await.map_err(db_err)?;
    info!("All migrations applied successfully");
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_statements() {
        let sql = include_str!("../migrations/001_create_jobs.sql");
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS jobs"));
        assert!(statements.iter().all(|s| !s.contains("--")));
    }
}
