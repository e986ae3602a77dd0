// SQLite ScheduleStore Implementation

use crate::error::map_sqlx_error;
use crate::job_store::insert_job;
use async_trait::async_trait;
use courier_core::domain::{Cadence, Job, JobId, JobPayload, RecurringSchedule, TaskName};
use courier_core::error::{AppError, Result};
use courier_core::port::{ScheduleStore, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

pub struct SqliteScheduleStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteScheduleStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl ScheduleStore for SqliteScheduleStore {
    async fn insert_schedule(&self, schedule: &RecurringSchedule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recurring_schedules (
                id, name, cadence, task_name, payload, priority, max_attempts,
                next_run_at, last_fired_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&schedule.id)
        .bind(&schedule.name)
        .bind(serde_json::to_string(&schedule.cadence)?)
        .bind(schedule.task_name.as_str())
        .bind(schedule.payload.to_value().to_string())
        .bind(schedule.priority)
        .bind(schedule.max_attempts)
        .bind(schedule.next_run_at)
        .bind(schedule.last_fired_at)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(format!("schedule '{}' already exists", schedule.name))
            }
            _ => map_sqlx_error(e),
        })?;

        Ok(())
    }

    async fn find_schedule(&self, name: &str) -> Result<Option<RecurringSchedule>> {
        let row = sqlx::query_as::<_, ScheduleRow>(
            "SELECT * FROM recurring_schedules WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(ScheduleRow::into_schedule).transpose()
    }

    async fn list_schedules(&self) -> Result<Vec<RecurringSchedule>> {
        let rows: Vec<ScheduleRow> =
            sqlx::query_as("SELECT * FROM recurring_schedules ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        rows.into_iter().map(ScheduleRow::into_schedule).collect()
    }

    async fn delete_schedule(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM recurring_schedules WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn due_schedules(&self, now_millis: i64) -> Result<Vec<RecurringSchedule>> {
        let rows: Vec<ScheduleRow> = sqlx::query_as(
            "SELECT * FROM recurring_schedules WHERE next_run_at <= ? ORDER BY next_run_at",
        )
        .bind(now_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(ScheduleRow::into_schedule).collect()
    }

    async fn fire(
        &self,
        schedule: &RecurringSchedule,
        next_run_at: i64,
        job: &Job,
    ) -> Result<Option<JobId>> {
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Compare-and-swap on the watermark; a losing tick sees 0 rows
        let advanced = sqlx::query(
            r#"
            UPDATE recurring_schedules
            SET next_run_at = ?, last_fired_at = ?, updated_at = ?
            WHERE id = ? AND next_run_at = ?
            "#,
        )
        .bind(next_run_at)
        .bind(now)
        .bind(now)
        .bind(&schedule.id)
        .bind(schedule.next_run_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if advanced.rows_affected() == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            debug!(schedule = %schedule.name, "Watermark already advanced");
            return Ok(None);
        }

        let outcome = insert_job(&mut tx, job).await?;
        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(Some(outcome.job_id().clone()))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ScheduleRow {
    id: String,
    name: String,
    cadence: String,
    task_name: String,
    payload: String,
    priority: i32,
    max_attempts: i32,
    next_run_at: i64,
    last_fired_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl ScheduleRow {
    fn into_schedule(self) -> Result<RecurringSchedule> {
        let cadence: Cadence = serde_json::from_str(&self.cadence)?;
        let payload = JobPayload::from_value(serde_json::from_str(&self.payload)?)?;

        Ok(RecurringSchedule {
            id: self.id,
            name: self.name,
            cadence,
            task_name: TaskName::new(self.task_name),
            payload,
            priority: self.priority,
            max_attempts: self.max_attempts,
            next_run_at: self.next_run_at,
            last_fired_at: self.last_fired_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
