// SQLite Maintenance Implementation
use crate::error::map_sqlx_error;
use async_trait::async_trait;
use courier_core::domain::JobState;
use courier_core::error::Result;
use courier_core::port::{Maintenance, MaintenanceStats, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// SQLite maintenance implementation
pub struct SqliteMaintenance {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteMaintenance {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    /// (size in bytes, free pages ratio)
    async fn page_stats(&self) -> Result<(i64, f64)> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let freelist_count: i64 = sqlx::query_scalar("PRAGMA freelist_count")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let free_ratio = if page_count > 0 {
            freelist_count as f64 / page_count as f64
        } else {
            0.0
        };

        Ok((page_count * page_size, free_ratio))
    }

    async fn count(&self, sql: &str, states: &[JobState]) -> Result<i64> {
        let mut query = sqlx::query_scalar::<_, i64>(sql);
        for state in states {
            query = query.bind(state.as_str());
        }
        query.fetch_one(&self.pool).await.map_err(map_sqlx_error)
    }
}

fn to_mb(bytes: i64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn vacuum(&self) -> Result<f64> {
        info!("Running VACUUM to optimize database...");

        let (size_before, _) = self.page_stats().await?;

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let (size_after, _) = self.page_stats().await?;
        let reclaimed = to_mb(size_before - size_after).max(0.0);

        info!(
            size_before_mb = to_mb(size_before),
            size_after_mb = to_mb(size_after),
            reclaimed_mb = reclaimed,
            "VACUUM completed"
        );

        Ok(reclaimed)
    }

    async fn gc_finished_jobs(&self, retention_days: i64) -> Result<i64> {
        let now = self.time_provider.now_millis();
        let cutoff_time = now.saturating_sub(retention_days.saturating_mul(DAY_MS));

        info!(
            retention_days = retention_days,
            cutoff_time = cutoff_time,
            "Running finished job GC"
        );

        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE state IN (?, ?, ?)
            AND finished_at IS NOT NULL
            AND finished_at < ?
            "#,
        )
        .bind(JobState::Succeeded.as_str())
        .bind(JobState::Dead.as_str())
        .bind(JobState::Cancelled.as_str())
        .bind(cutoff_time)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let deleted = result.rows_affected() as i64;
        info!(deleted_jobs = deleted, "Finished job GC completed");
        Ok(deleted)
    }

    async fn get_stats(&self) -> Result<MaintenanceStats> {
        let (db_size_bytes, free_ratio) = self.page_stats().await?;

        let job_count = self.count("SELECT COUNT(*) FROM jobs", &[]).await?;
        let finished_job_count = self
            .count(
                "SELECT COUNT(*) FROM jobs WHERE state IN (?, ?, ?)",
                &[JobState::Succeeded, JobState::Dead, JobState::Cancelled],
            )
            .await?;
        let dead_job_count = self
            .count("SELECT COUNT(*) FROM jobs WHERE state = ?", &[JobState::Dead])
            .await?;
        let schedule_count = self
            .count("SELECT COUNT(*) FROM recurring_schedules", &[])
            .await?;

        Ok(MaintenanceStats {
            db_size_mb: to_mb(db_size_bytes),
            db_size_bytes,
            job_count,
            finished_job_count,
            dead_job_count,
            schedule_count,
            fragmentation_percent: free_ratio * 100.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, SqliteJobStore};
    use courier_core::domain::Job;
    use courier_core::port::time_provider::mocks::ManualTimeProvider;
    use courier_core::port::JobStore;

    const NOW: i64 = 1_772_445_600_000;

    async fn setup() -> (SqliteJobStore, SqliteMaintenance) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualTimeProvider::new(NOW));
        (
            SqliteJobStore::new(pool.clone(), clock.clone()),
            SqliteMaintenance::new(pool, clock),
        )
    }

    fn finished(state: JobState, finished_at: i64) -> Job {
        let mut job = Job::new_test("send_email", finished_at);
        job.state = state;
        job.finished_at = Some(finished_at);
        job
    }

    #[tokio::test]
    async fn test_maintenance_stats() {
        let (jobs, maintenance) = setup().await;
        jobs.submit(&Job::new_test("send_email", NOW)).await.unwrap();
        jobs.submit(&finished(JobState::Dead, NOW)).await.unwrap();

        let stats = maintenance.get_stats().await.unwrap();
        assert!(stats.db_size_bytes > 0);
        assert_eq!(stats.job_count, 2);
        assert_eq!(stats.finished_job_count, 1);
        assert_eq!(stats.dead_job_count, 1);
        assert_eq!(stats.schedule_count, 0);
    }

    #[tokio::test]
    async fn test_vacuum() {
        let (_jobs, maintenance) = setup().await;
        let reclaimed = maintenance.vacuum().await.unwrap();
        assert!(reclaimed >= 0.0);
    }

    #[tokio::test]
    async fn test_gc_only_removes_old_terminal_jobs() {
        let (jobs, maintenance) = setup().await;
        let ten_days_ago = NOW - 10 * DAY_MS;

        let old_done = finished(JobState::Succeeded, ten_days_ago);
        let old_dead = finished(JobState::Dead, ten_days_ago);
        let recent_done = finished(JobState::Succeeded, NOW - DAY_MS);
        let old_pending = Job::new_test("send_email", ten_days_ago);
        for job in [&old_done, &old_dead, &recent_done, &old_pending] {
            jobs.submit(job).await.unwrap();
        }

        assert_eq!(maintenance.gc_finished_jobs(7).await.unwrap(), 2);
        assert!(jobs.get(&old_done.id).await.unwrap().is_none());
        assert!(jobs.get(&old_dead.id).await.unwrap().is_none());
        assert!(jobs.get(&recent_done.id).await.unwrap().is_some());
        assert!(jobs.get(&old_pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_gc_with_huge_retention_keeps_everything() {
        let (jobs, maintenance) = setup().await;
        let ancient = finished(JobState::Succeeded, 0);
        jobs.submit(&ancient).await.unwrap();

        for days in [200_000_000_000, i64::MAX] {
            assert_eq!(maintenance.gc_finished_jobs(days).await.unwrap(), 0);
        }
        assert!(jobs.get(&ancient.id).await.unwrap().is_some());
    }
}
