// SQLite JobStore Implementation
//
// Each mutation is one conditional UPDATE over state + lease columns. SQLite
// serializes writers, so the WHERE clause decides every race.

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use courier_core::domain::{
    ErrorKind, Job, JobFailure, JobPayload, JobState, Progress, TaskName,
};
use courier_core::error::{AppError, Result};
use courier_core::port::{CancelOutcome, JobStore, SubmitOutcome, TimeProvider};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::sync::Arc;

pub struct SqliteJobStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

/// Insert a job, honouring the dedup key. Shared with the schedule store so a
/// fired occurrence is written inside the schedule's transaction.
pub(crate) async fn insert_job(conn: &mut SqliteConnection, job: &Job) -> Result<SubmitOutcome> {
    let result = sqlx::query(
        r#"
        INSERT INTO jobs (
            id, task_name, payload, state, priority,
            attempt_count, max_attempts, not_before,
            lease_owner, lease_expires_at,
            last_error, last_error_kind, result, progress,
            dedup_key, schedule_id,
            created_at, updated_at, finished_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(dedup_key) DO NOTHING
        "#,
    )
    .bind(&job.id)
    .bind(job.task_name.as_str())
    .bind(job.payload.to_value().to_string())
    .bind(job.state.as_str())
    .bind(job.priority)
    .bind(job.attempt_count)
    .bind(job.max_attempts)
    .bind(job.not_before)
    .bind(&job.lease_owner)
    .bind(job.lease_expires_at)
    .bind(&job.last_error)
    .bind(job.last_error_kind.map(|k| k.as_str()))
    .bind(job.result.as_ref().map(|r| r.to_string()))
    .bind(job.progress.as_ref().map(serde_json::to_string).transpose()?)
    .bind(&job.dedup_key)
    .bind(&job.schedule_id)
    .bind(job.created_at)
    .bind(job.updated_at)
    .bind(job.finished_at)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    if result.rows_affected() > 0 {
        return Ok(SubmitOutcome::Created(job.id.clone()));
    }

    // Only the dedup_key conflict is ignored; find the job that holds the key
    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM jobs WHERE dedup_key = ?")
        .bind(&job.dedup_key)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    existing.map(SubmitOutcome::Duplicate).ok_or_else(|| {
        AppError::Database(format!("job {} was neither inserted nor deduplicated", job.id))
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn submit(&self, job: &Job) -> Result<SubmitOutcome> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        insert_job(&mut conn, job).await
    }

    async fn try_lease(
        &self,
        worker_id: &str,
        lease_ms: i64,
        eligible_task_names: Option<&[String]>,
    ) -> Result<Option<Job>> {
        if eligible_task_names.is_some_and(|names| names.is_empty()) {
            return Ok(None);
        }
        let now = self.time_provider.now_millis();

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE jobs SET state = ");
        query
            .push_bind(JobState::Leased.as_str())
            .push(", lease_owner = ")
            .push_bind(worker_id)
            .push(", lease_expires_at = ")
            .push_bind(now + lease_ms)
            .push(", attempt_count = attempt_count + 1, updated_at = ")
            .push_bind(now)
            .push(" WHERE id = (SELECT id FROM jobs WHERE state IN (")
            .push_bind(JobState::Pending.as_str())
            .push(", ")
            .push_bind(JobState::Scheduled.as_str())
            .push(") AND not_before <= ")
            .push_bind(now);

        if let Some(names) = eligible_task_names {
            query.push(" AND task_name IN (");
            let mut separated = query.separated(", ");
            for name in names {
                separated.push_bind(name.as_str());
            }
            separated.push_unseparated(")");
        }

        query
            .push(" ORDER BY priority DESC, not_before ASC, created_at ASC, seq ASC LIMIT 1)")
            .push(" AND state IN (")
            .push_bind(JobState::Pending.as_str())
            .push(", ")
            .push_bind(JobState::Scheduled.as_str())
            .push(") RETURNING *");

        let row = query
            .build_query_as::<JobRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn mark_running(&self, job_id: &str, worker_id: &str) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, updated_at = ?
            WHERE id = ? AND state = ? AND lease_owner = ? AND lease_expires_at >= ?
            "#,
        )
        .bind(JobState::Running.as_str())
        .bind(now)
        .bind(job_id)
        .bind(JobState::Leased.as_str())
        .bind(worker_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn renew_lease(&self, job_id: &str, worker_id: &str, extension_ms: i64) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = ?, updated_at = ?
            WHERE id = ? AND state IN (?, ?) AND lease_owner = ? AND lease_expires_at >= ?
            "#,
        )
        .bind(now + extension_ms)
        .bind(now)
        .bind(job_id)
        .bind(JobState::Leased.as_str())
        .bind(JobState::Running.as_str())
        .bind(worker_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_progress(
        &self,
        job_id: &str,
        worker_id: &str,
        progress: &Progress,
    ) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET progress = ?, updated_at = ?
            WHERE id = ? AND state IN (?, ?) AND lease_owner = ?
            "#,
        )
        .bind(serde_json::to_string(progress)?)
        .bind(now)
        .bind(job_id)
        .bind(JobState::Leased.as_str())
        .bind(JobState::Running.as_str())
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(
        &self,
        job_id: &str,
        worker_id: &str,
        result: &serde_json::Value,
    ) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let outcome = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, result = ?, lease_owner = NULL, lease_expires_at = NULL,
                updated_at = ?, finished_at = ?
            WHERE id = ? AND state = ? AND lease_owner = ?
            "#,
        )
        .bind(JobState::Succeeded.as_str())
        .bind(result.to_string())
        .bind(now)
        .bind(now)
        .bind(job_id)
        .bind(JobState::Running.as_str())
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(outcome.rows_affected() == 1)
    }

    async fn fail(&self, job_id: &str, worker_id: &str, failure: &JobFailure) -> Result<bool> {
        let now = self.time_provider.now_millis();
        // Lease columns stay set until the retry decision lands
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, last_error = ?, last_error_kind = ?, updated_at = ?
            WHERE id = ? AND state = ? AND lease_owner = ?
            "#,
        )
        .bind(JobState::Failed.as_str())
        .bind(&failure.message)
        .bind(failure.kind.as_str())
        .bind(now)
        .bind(job_id)
        .bind(JobState::Running.as_str())
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn schedule_retry(&self, job_id: &str, not_before: i64) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, not_before = ?, lease_owner = NULL, lease_expires_at = NULL,
                updated_at = ?
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(JobState::Scheduled.as_str())
        .bind(not_before)
        .bind(now)
        .bind(job_id)
        .bind(JobState::Failed.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_dead(&self, job_id: &str) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, lease_owner = NULL, lease_expires_at = NULL,
                updated_at = ?, finished_at = ?
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(JobState::Dead.as_str())
        .bind(now)
        .bind(now)
        .bind(job_id)
        .bind(JobState::Failed.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn reclaim_expired(&self) -> Result<Vec<Job>> {
        let now = self.time_provider.now_millis();
        let dead = JobState::Dead.as_str();
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET state = CASE WHEN attempt_count >= max_attempts THEN ? ELSE ? END,
                last_error = CASE WHEN attempt_count >= max_attempts
                    THEN 'Lease expired with no attempts left' ELSE last_error END,
                last_error_kind = CASE WHEN attempt_count >= max_attempts
                    THEN ? ELSE last_error_kind END,
                finished_at = CASE WHEN attempt_count >= max_attempts THEN ? ELSE finished_at END,
                not_before = CASE WHEN attempt_count >= max_attempts THEN not_before ELSE ? END,
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = ?
            WHERE state IN (?, ?) AND lease_expires_at < ?
            RETURNING *
            "#,
        )
        .bind(dead)
        .bind(JobState::Pending.as_str())
        .bind(ErrorKind::LeaseExpired.as_str())
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(JobState::Leased.as_str())
        .bind(JobState::Running.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn find_stranded_failures(&self) -> Result<Vec<Job>> {
        let now = self.time_provider.now_millis();
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE state = ? AND (lease_expires_at IS NULL OR lease_expires_at < ?)
            ORDER BY seq ASC
            "#,
        )
        .bind(JobState::Failed.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn cancel(&self, job_id: &str) -> Result<CancelOutcome> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, updated_at = ?, finished_at = ?
            WHERE id = ? AND state IN (?, ?)
            "#,
        )
        .bind(JobState::Cancelled.as_str())
        .bind(now)
        .bind(now)
        .bind(job_id)
        .bind(JobState::Pending.as_str())
        .bind(JobState::Scheduled.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 1 {
            return Ok(CancelOutcome::Cancelled);
        }

        let state: Option<String> = sqlx::query_scalar("SELECT state FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match state {
            Some(s) => Ok(CancelOutcome::NotCancellable(s.parse()?)),
            None => Ok(CancelOutcome::NotFound),
        }
    }

    async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE state = ? ORDER BY seq")
            .bind(state.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn count_by_state(&self, state: JobState) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE state = ?")
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

// Internal row mapping
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    task_name: String,
    payload: String,
    state: String,
    priority: i32,

    attempt_count: i32,
    max_attempts: i32,
    not_before: i64,

    lease_owner: Option<String>,
    lease_expires_at: Option<i64>,

    last_error: Option<String>,
    last_error_kind: Option<String>,
    result: Option<String>,
    progress: Option<String>,

    dedup_key: Option<String>,
    schedule_id: Option<String>,

    created_at: i64,
    updated_at: i64,
    finished_at: Option<i64>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let payload = JobPayload::from_value(serde_json::from_str(&self.payload)?)?;
        let last_error_kind = self
            .last_error_kind
            .as_deref()
            .map(str::parse::<ErrorKind>)
            .transpose()?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let progress: Option<Progress> = self
            .progress
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Job {
            id: self.id,
            task_name: TaskName::new(self.task_name),
            payload,
            state: self.state.parse()?,
            priority: self.priority,
            attempt_count: self.attempt_count,
            max_attempts: self.max_attempts,
            not_before: self.not_before,
            lease_owner: self.lease_owner,
            lease_expires_at: self.lease_expires_at,
            last_error: self.last_error,
            last_error_kind,
            result,
            progress,
            dedup_key: self.dedup_key,
            schedule_id: self.schedule_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            finished_at: self.finished_at,
        })
    }
}
