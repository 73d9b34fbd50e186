// SQLite JobRepository Implementation

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
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

// Helper to convert sqlx::Error to AppError with structured information
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            // SQLite result codes: https://www.sqlite.org/rescode.html
            Some(code) => match code.as_ref() {
                "5" | "517" => {
                    AppError::Database(format!("Database locked (SQLITE_BUSY): {}", db_err.message()))
                }
                "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                "275" | "2067" | "1555" => AppError::Database(format!(
                    "Constraint violation: {} ({})",
                    db_err.message(),
                    code
                )),
                other => AppError::Database(format!(
                    "Database error [{}]: {}",
                    other,
                    db_err.message()
                )),
            },
            None => AppError::Database(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::ColumnNotFound(col) => AppError::Database(format!("Column not found: {}", col)),
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}

/// `?, ?, ?` for an IN list of `n` values
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

pub struct SqliteJobRepository {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &NewJob) -> Result<JobId> {
        let now = self.time_provider.now_millis();
        let available_at = job.available_at(now)?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (task_type, status, payload, attempts, max_attempts, available_at, created_at)
            VALUES (?, 'pending', ?, 0, ?, ?, ?)
            "#,
        )
        .bind(job.task_type.as_str())
        .bind(job.payload.as_value().to_string())
        .bind(job.max_attempts)
        .bind(available_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.last_insert_rowid())
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
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

        // One statement: SQLite serializes writers, so selection and update
        // cannot interleave with another claimer
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'in_progress', attempts = attempts + 1, started_at = ?
            WHERE id IN (
                SELECT id FROM jobs
                WHERE status = 'pending'
                  AND available_at <= ?
                  AND attempts < max_attempts
                  AND task_type IN ({})
                ORDER BY available_at ASC, id ASC
                LIMIT ?
            )
            RETURNING *
            "#,
            placeholders(task_types.len())
        );

        let mut query = sqlx::query_as::<_, JobRow>(&sql).bind(now).bind(now);
        for task_type in task_types {
            query = query.bind(task_type.as_str());
        }
        let rows = query
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        // RETURNING order is unspecified
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
            SET status = 'completed', result = ?, completed_at = ?
            WHERE id = ? AND status = 'in_progress' AND attempts = ?
            "#,
        )
        .bind(result.map(|value| value.to_string()))
        .bind(now)
        .bind(id)
        .bind(attempt)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if updated.rows_affected() > 0 {
            return Ok(true);
        }

        // Distinguish "already resolved" from "never existed"
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM jobs WHERE id = ?")
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

        let mut job = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
        if job.status != JobStatus::InProgress || job.attempts != attempt {
            return Ok(FailureOutcome::Ignored);
        }

        let decision = policy.decide(job.attempts, job.max_attempts, retryable);
        job.apply_failure(&decision, message, now)?;

        // Guarded on the caller's claim: a reclaim and re-claim between the
        // read above and this write bumps attempts, so nothing is updated
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, available_at = ?, started_at = ?, completed_at = ?, error_message = ?
            WHERE id = ? AND status = 'in_progress' AND attempts = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.available_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error_message)
        .bind(id)
        .bind(job.attempts)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if updated.rows_affected() == 0 {
            return Ok(FailureOutcome::Ignored);
        }

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

        let type_filter = task_types
            .map(|types| format!("AND task_type IN ({})", placeholders(types.len())))
            .unwrap_or_default();
        let types: &[TaskType] = task_types.unwrap_or(&[]);

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Out of attempts: resolve as failed
        let fail_sql = format!(
            r#"
            UPDATE jobs
            SET status = 'failed', completed_at = ?, error_message = ?
            WHERE status = 'in_progress' AND started_at < ? AND attempts >= max_attempts {}
            RETURNING *
            "#,
            type_filter
        );
        let mut fail_query = sqlx::query_as::<_, JobRow>(&fail_sql)
            .bind(now)
            .bind(STALLED_MESSAGE)
            .bind(cutoff);
        for task_type in types {
            fail_query = fail_query.bind(task_type.as_str());
        }
        let failed_rows = fail_query.fetch_all(&mut *tx).await.map_err(map_sqlx_error)?;

        // Attempts left: back to pending, attempts untouched
        let requeue_sql = format!(
            r#"
            UPDATE jobs
            SET status = 'pending', started_at = NULL, available_at = ?
            WHERE status = 'in_progress' AND started_at < ? AND attempts < max_attempts {}
            "#,
            type_filter
        );
        let mut requeue_query = sqlx::query(&requeue_sql).bind(now).bind(cutoff);
        for task_type in types {
            requeue_query = requeue_query.bind(task_type.as_str());
        }
        let requeued = requeue_query
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

    async fn count_by_status(&self, task_type: Option<&TaskType>, status: JobStatus) -> Result<i64> {
        let task_type = task_type.map(|t| t.as_str());

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE status = ? AND (? IS NULL OR task_type = ?)",
        )
        .bind(status.as_str())
        .bind(task_type)
        .bind(task_type)
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

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    task_type: String,
    status: String,
    payload: String,
    result: Option<String>,
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
        let result: Option<serde_json::Value> = self
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Job {
            id: self.id,
            task_type: TaskType::new(self.task_type),
            status: self.status.parse()?,
            payload: JobPayload::new(serde_json::from_str(&self.payload)?),
            result,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use courier_core::port::time_provider::mocks::ManualClock;
    use serde_json::json;

    const START: i64 = 1_700_000_000_000;

    async fn setup_test_db() -> (SqliteJobRepository, Arc<ManualClock>) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualClock::new(START));
        (SqliteJobRepository::new(pool, clock.clone()), clock)
    }

    fn types(names: &[&str]) -> Vec<TaskType> {
        names.iter().map(|n| TaskType::new(*n)).collect()
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let (repo, _clock) = setup_test_db().await;

        let id = repo
            .insert(&NewJob::new("create_order", json!({"ref": "A1", "qty": 2})))
            .await
            .unwrap();

        let job = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(job.task_type.as_str(), "create_order");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.payload.as_value(), &json!({"ref": "A1", "qty": 2}));
        assert_eq!(job.attempts, 0);
        assert_eq!(job.available_at, START);
        assert_eq!(job.created_at, START);

        assert!(repo.find_by_id(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_oldest_due_first_and_filters_types() {
        let (repo, _clock) = setup_test_db().await;

        let later = repo
            .insert(&NewJob::new("create_order", json!({})).with_delay(Duration::from_secs(60)))
            .await
            .unwrap();
        let first = repo.insert(&NewJob::new("create_order", json!({}))).await.unwrap();
        let second = repo.insert(&NewJob::new("create_order", json!({}))).await.unwrap();
        repo.insert(&NewJob::new("tracking_number", json!({})))
            .await
            .unwrap();

        let claimed = repo
            .claim_batch(&types(&["create_order"]), 10)
            .await
            .unwrap();
        let ids: Vec<_> = claimed.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![first, second], "delayed job and other types skipped");

        for job in &claimed {
            assert_eq!(job.status, JobStatus::InProgress);
            assert_eq!(job.attempts, 1);
            assert_eq!(job.started_at, Some(START));
        }

        let waiting = repo.find_by_id(later).await.unwrap().unwrap();
        assert_eq!(waiting.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_claim_respects_limit_and_never_reclaims() {
        let (repo, _clock) = setup_test_db().await;
        for i in 0..5 {
            repo.insert(&NewJob::new("create_order", json!({ "n": i })))
                .await
                .unwrap();
        }
        let task_types = types(&["create_order"]);

        assert_eq!(repo.claim_batch(&task_types, 2).await.unwrap().len(), 2);
        assert_eq!(repo.claim_batch(&task_types, 10).await.unwrap().len(), 3);
        assert!(repo.claim_batch(&task_types, 10).await.unwrap().is_empty());
        assert!(repo.claim_batch(&[], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delayed_job_becomes_claimable() {
        let (repo, clock) = setup_test_db().await;
        repo.insert(&NewJob::new("create_order", json!({})).with_delay(Duration::from_secs(30)))
            .await
            .unwrap();
        let task_types = types(&["create_order"]);

        assert!(repo.claim_batch(&task_types, 1).await.unwrap().is_empty());
        clock.advance(Duration::from_secs(30));
        assert_eq!(repo.claim_batch(&task_types, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_success_is_idempotent() {
        let (repo, _clock) = setup_test_db().await;
        let id = repo.insert(&NewJob::new("create_order", json!({}))).await.unwrap();
        repo.claim_batch(&types(&["create_order"]), 1).await.unwrap();

        assert!(repo
            .record_success(id, 1, Some(json!({"tracking": "T1"})))
            .await
            .unwrap());
        assert!(!repo.record_success(id, 1, None).await.unwrap());

        let job = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"tracking": "T1"})));
        assert_eq!(job.completed_at, Some(START));

        assert!(matches!(
            repo.record_success(9_999, 1, None).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_record_failure_retries_with_backoff_then_fails() {
        let (repo, clock) = setup_test_db().await;
        let policy = RetryPolicy::default();
        let task_types = types(&["create_order"]);
        let id = repo
            .insert(&NewJob::new("create_order", json!({})).with_max_attempts(2))
            .await
            .unwrap();

        repo.claim_batch(&task_types, 1).await.unwrap();
        let outcome = repo
            .record_failure(id, 1, "carrier timeout", true, &policy)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            FailureOutcome::Retrying {
                available_at: START + 5_000,
                delay: Duration::from_secs(5),
            }
        );

        let job = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.started_at, None);
        assert_eq!(job.error_message.as_deref(), Some("carrier timeout"));

        clock.advance(Duration::from_secs(5));
        repo.claim_batch(&task_types, 1).await.unwrap();
        let outcome = repo
            .record_failure(id, 2, "carrier timeout again", true, &policy)
            .await
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Failed);

        let job = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.completed_at, Some(START + 5_000));
    }

    #[tokio::test]
    async fn test_record_failure_on_resolved_job_is_ignored() {
        let (repo, _clock) = setup_test_db().await;
        let id = repo.insert(&NewJob::new("create_order", json!({}))).await.unwrap();

        let outcome = repo
            .record_failure(id, 0, "late", true, &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Ignored);
        assert_eq!(
            repo.find_by_id(id).await.unwrap().unwrap().status,
            JobStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_outcome_from_superseded_claim_is_ignored() {
        let (repo, clock) = setup_test_db().await;
        let task_types = types(&["create_order"]);
        let id = repo.insert(&NewJob::new("create_order", json!({}))).await.unwrap();

        let stale = repo.claim_batch(&task_types, 1).await.unwrap().remove(0);
        clock.advance(Duration::from_secs(31 * 60));
        repo.reclaim_stalled(None, Duration::from_secs(30 * 60))
            .await
            .unwrap();
        let live = repo.claim_batch(&task_types, 1).await.unwrap().remove(0);
        assert_eq!(live.attempts, 2);

        let outcome = repo
            .record_failure(id, stale.attempts, "timeout", true, &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Ignored);
        assert!(!repo.record_success(id, stale.attempts, None).await.unwrap());

        // Still held by the live claim, so nobody else can take it
        clock.advance(Duration::from_secs(60));
        assert!(repo.claim_batch(&task_types, 1).await.unwrap().is_empty());
        let job = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
        assert_eq!(job.started_at, Some(START + 31 * 60 * 1_000));

        assert!(repo.record_success(id, live.attempts, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_rejects_unrepresentable_delay() {
        let (repo, _clock) = setup_test_db().await;
        let err = repo
            .insert(&NewJob::new("create_order", json!({})).with_delay(Duration::from_secs(u64::MAX)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Domain(_)));
        assert!(repo
            .claim_batch(&types(&["create_order"]), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retry() {
        let (repo, _clock) = setup_test_db().await;
        let id = repo.insert(&NewJob::new("create_order", json!({}))).await.unwrap();
        repo.claim_batch(&types(&["create_order"]), 1).await.unwrap();

        let outcome = repo
            .record_failure(id, 1, "invalid address", false, &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Failed);
        assert_eq!(repo.find_by_id(id).await.unwrap().unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_reclaim_stalled() {
        let (repo, clock) = setup_test_db().await;
        let task_types = types(&["create_order"]);
        let retry = repo.insert(&NewJob::new("create_order", json!({}))).await.unwrap();
        let exhausted = repo
            .insert(&NewJob::new("create_order", json!({})).with_max_attempts(1))
            .await
            .unwrap();
        repo.claim_batch(&task_types, 10).await.unwrap();

        clock.advance(Duration::from_secs(10));
        let fresh = repo
            .reclaim_stalled(None, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(fresh.is_empty());

        clock.advance(Duration::from_secs(60));
        let other_types = types(&["tracking_number"]);
        assert!(repo
            .reclaim_stalled(Some(other_types.as_slice()), Duration::from_secs(60))
            .await
            .unwrap()
            .is_empty());

        let report = repo
            .reclaim_stalled(Some(task_types.as_slice()), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, exhausted);
        assert_eq!(report.failed[0].error_message.as_deref(), Some(STALLED_MESSAGE));

        let job = repo.find_by_id(retry).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.started_at, None);

        // Requeued job is immediately claimable again
        let reclaimed = repo.claim_batch(&task_types, 10).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_counts() {
        let (repo, _clock) = setup_test_db().await;
        for _ in 0..3 {
            repo.insert(&NewJob::new("create_order", json!({})))
                .await
                .unwrap();
        }
        repo.insert(&NewJob::new("tracking_number", json!({})))
            .await
            .unwrap();
        repo.claim_batch(&types(&["create_order"]), 1).await.unwrap();

        let create_order = TaskType::new("create_order");
        assert_eq!(
            repo.count_by_status(Some(&create_order), JobStatus::Pending)
                .await
                .unwrap(),
            2
        );
        assert_eq!(repo.count_by_status(None, JobStatus::Pending).await.unwrap(), 3);

        let counts = repo.status_counts().await.unwrap();
        assert_eq!(
            counts,
            vec![
                StatusCount {
                    task_type: "create_order".to_string(),
                    status: JobStatus::InProgress,
                    count: 1,
                },
                StatusCount {
                    task_type: "create_order".to_string(),
                    status: JobStatus::Pending,
                    count: 2,
                },
                StatusCount {
                    task_type: "tracking_number".to_string(),
                    status: JobStatus::Pending,
                    count: 1,
                },
            ]
        );
    }
}
