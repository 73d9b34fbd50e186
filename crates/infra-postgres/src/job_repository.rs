// PostgreSQL JobRepository Implementation

use async_trait::async_trait;
use courier_core::domain::{
    millis_before, Job, JobId, JobPayload, JobStatus, NewJob, RetryDecision, RetryPolicy,
    TaskType,
};
use courier_core::error::{AppError, Result};
use courier_core::port::job_repository::STALLED_MESSAGE;
use courier_core::port::{
    FailureOutcome, JobRepository, ReclaimReport, StatusCount, TimeProvider,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            // https://www.postgresql.org/docs/current/errcodes-appendix.html
            Some(code) => match code.as_ref() {
                "40001" | "40P01" => AppError::Database(format!(
                    "Transaction conflict ({}): {}",
                    code,
                    db_err.message()
                )),
                "23505" | "23514" => AppError::Database(format!(
                    "Constraint violation: {} ({})",
                    db_err.message(),
                    code
                )),
                "53300" => AppError::Database(format!(
                    "Too many connections: {}",
                    db_err.message()
                )),
                other => AppError::Database(format!(
                    "Database error [{}]: {}",
                    other,
                    db_err.message()
                )),
            },
            None => AppError::Database(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        sqlx::Error::PoolTimedOut => AppError::Database("Connection pool timed out".to_string()),
        _ => AppError::Database(err.to_string()),
    }
}

fn type_names(task_types: &[TaskType]) -> Vec<String> {
    task_types.iter().map(|t| t.as_str().to_string()).collect()
}

/// Job store on PostgreSQL
///
/// Claims lock candidate rows with `FOR UPDATE SKIP LOCKED`, so concurrent
/// claimers pass over each other's rows instead of blocking on them.
pub struct PgJobRepository {
    pool: PgPool,
    time_provider: Arc<dyn TimeProvider>,
}

impl PgJobRepository {
    pub fn new(pool: PgPool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn insert(&self, job: &NewJob) -> Result<JobId> {
        let now = self.time_provider.now_millis();
        let available_at = job.available_at(now)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (task_type, status, payload, attempts, max_attempts, available_at, created_at)
            VALUES ($1, 'pending', $2, 0, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(job.task_type.as_str())
        .bind(job.payload.as_value())
        .bind(job.max_attempts)
        .bind(available_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(id)
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn claim_batch(&self, task_types: &[TaskType], limit: usize) -> Result<Vec<Job>> {
        if task_types.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let now = self.time_provider.now_millis();

        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            WITH next_jobs AS (
                SELECT id
                FROM jobs
                WHERE status = 'pending'
                  AND available_at <= $1
                  AND attempts < max_attempts
                  AND task_type = ANY($2)
                ORDER BY available_at, id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'in_progress', attempts = attempts + 1, started_at = $1
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(type_names(task_types))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut jobs = rows
            .into_iter()
            .map(JobRow::into_job)
            .collect::<Result<Vec<_>>>()?;
        jobs.sort_by_key(|job| (job.available_at, job.id));

        if !jobs.is_empty() {
            debug!(claimed = jobs.len(), limit, "Claimed jobs");
        }
        Ok(jobs)
    }

    async fn record_success(
        &self,
        id: JobId,
        attempt: i32,
        result: Option<serde_json::Value>,
    ) -> Result<bool> {
        let now = self.time_provider.now_millis();

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', result = $1, completed_at = $2
            WHERE id = $3 AND status = 'in_progress' AND attempts = $4
            "#,
        )
        .bind(result)
        .bind(now)
        .bind(id)
        .bind(attempt)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if updated.rows_affected() > 0 {
            return Ok(true);
        }

        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        match exists {
            Some(_) => Ok(false),
            None => Err(AppError::NotFound(format!("Job {} not found", id))),
        }
    }

    async fn record_failure(
        &self,
        id: JobId,
        attempt: i32,
        message: &str,
        retryable: bool,
        policy: &RetryPolicy,
    ) -> Result<FailureOutcome> {
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Row lock keeps a concurrent reclaim from interleaving with the decision
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        let mut job = row
            .map(JobRow::into_job)
            .transpose()?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;

        // Resolved, or reclaimed and claimed again since the caller's claim
        if job.status != JobStatus::InProgress || job.attempts != attempt {
            return Ok(FailureOutcome::Ignored);
        }

        let decision = policy.decide(job.attempts, job.max_attempts, retryable);
        job.apply_failure(&decision, message, now)?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, available_at = $2, started_at = $3, completed_at = $4, error_message = $5
            WHERE id = $6 AND status = 'in_progress' AND attempts = $7
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.available_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error_message)
        .bind(id)
        .bind(attempt)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(match decision {
            RetryDecision::Retry(delay) => FailureOutcome::Retrying {
                available_at: job.available_at,
                delay,
            },
            RetryDecision::Fail => FailureOutcome::Failed,
        })
    }

    async fn reclaim_stalled(
        &self,
        task_types: Option<&[TaskType]>,
        timeout: Duration,
    ) -> Result<ReclaimReport> {
        if task_types.is_some_and(|types| types.is_empty()) {
            return Ok(ReclaimReport::default());
        }
        let now = self.time_provider.now_millis();
        let cutoff = millis_before(now, timeout);
        let types = task_types.map(type_names);

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let failed_rows = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'failed', completed_at = $1, error_message = $2
            WHERE status = 'in_progress'
              AND started_at < $3
              AND attempts >= max_attempts
              AND ($4::TEXT[] IS NULL OR task_type = ANY($4))
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(STALLED_MESSAGE)
        .bind(cutoff)
        .bind(&types)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let requeued = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', started_at = NULL, available_at = $1
            WHERE status = 'in_progress'
              AND started_at < $2
              AND attempts < max_attempts
              AND ($3::TEXT[] IS NULL OR task_type = ANY($3))
            "#,
        )
        .bind(now)
        .bind(cutoff)
        .bind(&types)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        tx.commit().await.map_err(map_sqlx_error)?;

        let mut failed = failed_rows
            .into_iter()
            .map(JobRow::into_job)
            .collect::<Result<Vec<_>>>()?;
        failed.sort_by_key(|job| job.id);

        Ok(ReclaimReport { requeued, failed })
    }

    async fn count_by_status(
        &self,
        task_type: Option<&TaskType>,
        status: JobStatus,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE status = $1 AND ($2::TEXT IS NULL OR task_type = $2)",
        )
        .bind(status.as_str())
        .bind(task_type.map(|t| t.as_str()))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(count)
    }

    async fn status_counts(&self) -> Result<Vec<StatusCount>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT task_type, status, COUNT(*) FROM jobs
            GROUP BY task_type, status
            ORDER BY task_type, status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|(task_type, status, count)| -> Result<StatusCount> {
                Ok(StatusCount {
                    task_type,
                    status: status.parse()?,
                    count,
                })
            })
            .collect()
    }
}

/// PostgreSQL row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    task_type: String,
    status: String,
    payload: serde_json::Value,
    result: Option<serde_json::Value>,
    attempts: i32,
    max_attempts: i32,
    available_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    error_message: Option<String>,
    created_at: i64,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        Ok(Job {
            id: self.id,
            task_type: TaskType::new(self.task_type),
            status: self.status.parse()?,
            payload: JobPayload::new(self.payload),
            result: self.result,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            available_at: self.available_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error_message: self.error_message,
            created_at: self.created_at,
        })
    }
}
