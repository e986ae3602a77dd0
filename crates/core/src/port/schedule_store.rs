// Recurring Schedule Store Port

use crate::domain::{Job, JobId, RecurringSchedule};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Insert a new schedule. A taken name is `AppError::Conflict`.
    async fn insert_schedule(&self, schedule: &RecurringSchedule) -> Result<()>;

    async fn find_schedule(&self, name: &str) -> Result<Option<RecurringSchedule>>;

    async fn list_schedules(&self) -> Result<Vec<RecurringSchedule>>;

    /// Returns false if no schedule had that name
    async fn delete_schedule(&self, name: &str) -> Result<bool>;

    /// Schedules with `next_run_at <= now_millis`
    async fn due_schedules(&self, now_millis: i64) -> Result<Vec<RecurringSchedule>>;

    /// Fire one occurrence in a single transaction.
    ///
    /// Moves the watermark from `schedule.next_run_at` to `next_run_at` (compare-and-swap)
    /// and inserts `job`. Returns `None` when another tick already advanced the watermark;
    /// in that case nothing is written.
    async fn fire(
        &self,
        schedule: &RecurringSchedule,
        next_run_at: i64,
        job: &Job,
    ) -> Result<Option<JobId>>;
}

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::JobStore;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// In-memory schedule store that writes fired jobs into an `InMemoryJobStore`
    pub struct InMemoryScheduleStore {
        schedules: Mutex<Vec<RecurringSchedule>>,
        jobs: Arc<InMemoryJobStore>,
    }

    impl InMemoryScheduleStore {
        pub fn new(jobs: Arc<InMemoryJobStore>) -> Self {
            Self {
                schedules: Mutex::new(Vec::new()),
                jobs,
            }
        }
    }

    #[async_trait]
    impl ScheduleStore for InMemoryScheduleStore {
        async fn insert_schedule(&self, schedule: &RecurringSchedule) -> Result<()> {
            let mut schedules = self.schedules.lock().await;
            if schedules.iter().any(|s| s.name == schedule.name) {
                return Err(AppError::Conflict(format!(
                    "schedule '{}' already exists",
                    schedule.name
                )));
            }
            schedules.push(schedule.clone());
            Ok(())
        }

        async fn find_schedule(&self, name: &str) -> Result<Option<RecurringSchedule>> {
            let schedules = self.schedules.lock().await;
            Ok(schedules.iter().find(|s| s.name == name).cloned())
        }

        async fn list_schedules(&self) -> Result<Vec<RecurringSchedule>> {
            Ok(self.schedules.lock().await.clone())
        }

        async fn delete_schedule(&self, name: &str) -> Result<bool> {
            let mut schedules = self.schedules.lock().await;
            let before = schedules.len();
            schedules.retain(|s| s.name != name);
            Ok(schedules.len() != before)
        }

        async fn due_schedules(&self, now_millis: i64) -> Result<Vec<RecurringSchedule>> {
            let schedules = self.schedules.lock().await;
            Ok(schedules
                .iter()
                .filter(|s| s.is_due(now_millis))
                .cloned()
                .collect())
        }

        async fn fire(
            &self,
            schedule: &RecurringSchedule,
            next_run_at: i64,
            job: &Job,
        ) -> Result<Option<JobId>> {
            // Held across the job insert so CAS + insert act as one unit
            let mut schedules = self.schedules.lock().await;
            let Some(stored) = schedules.iter_mut().find(|s| s.id == schedule.id) else {
                return Ok(None);
            };
            if stored.next_run_at != schedule.next_run_at {
                return Ok(None);
            }
            let outcome = self.jobs.submit(job).await?;
            stored.next_run_at = next_run_at;
            stored.last_fired_at = Some(job.created_at);
            stored.updated_at = job.created_at;
            Ok(Some(outcome.job_id().clone()))
        }
    }
}
