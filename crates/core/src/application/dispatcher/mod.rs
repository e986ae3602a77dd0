// Dispatcher - submission surface for producers (and the RPC layer)

pub mod schedule;
pub mod submit;
pub mod validate;

pub use schedule::RegisterScheduleRequest;
pub use submit::{validate_submit, SubmitReceipt, SubmitRequest};

use crate::application::registry::TaskRegistry;
use crate::domain::{
    ErrorKind, Job, JobId, JobState, Progress, RecurringSchedule, ScheduleId, TaskName,
};
use crate::error::{AppError, Result};
use crate::port::{CancelOutcome, IdProvider, JobStore, ScheduleStore, TimeProvider};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Externally visible view of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub task_name: TaskName,
    pub state: JobState,
    pub priority: i32,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub last_error_kind: Option<ErrorKind>,
    pub result: Option<serde_json::Value>,
    pub progress: Option<Progress>,
    pub not_before: i64,
    pub schedule_id: Option<ScheduleId>,
    pub created_at: i64,
    pub updated_at: i64,
    pub finished_at: Option<i64>,
}

impl From<Job> for JobStatus {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            task_name: job.task_name,
            state: job.state,
            priority: job.priority,
            attempt_count: job.attempt_count,
            max_attempts: job.max_attempts,
            last_error: job.last_error,
            last_error_kind: job.last_error_kind,
            result: job.result,
            progress: job.progress,
            not_before: job.not_before,
            schedule_id: job.schedule_id,
            created_at: job.created_at,
            updated_at: job.updated_at,
            finished_at: job.finished_at,
        }
    }
}

/// Dispatcher service
pub struct Dispatcher {
    job_store: Arc<dyn JobStore>,
    schedule_store: Arc<dyn ScheduleStore>,
    registry: Arc<TaskRegistry>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl Dispatcher {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        schedule_store: Arc<dyn ScheduleStore>,
        registry: Arc<TaskRegistry>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            job_store,
            schedule_store,
            registry,
            id_provider,
            time_provider,
        }
    }

    /// Persist a new job (PENDING, or SCHEDULED when delayed)
    pub async fn submit(&self, req: SubmitRequest) -> Result<SubmitReceipt> {
        if !self.registry.contains(&req.task_name) {
            // Accepted anyway: the job dies with UNKNOWN_TASK on its first lease
            warn!(task_name = %req.task_name, "Submitting job for unregistered task");
        }
        let task_name = req.task_name.clone();
        let receipt = submit::execute(
            self.job_store.as_ref(),
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            req,
        )
        .await?;

        info!(
            job_id = %receipt.job_id,
            task_name = %task_name,
            state = %receipt.state,
            deduplicated = receipt.deduplicated,
            "Job submitted"
        );
        Ok(receipt)
    }

    pub async fn get_status(&self, job_id: &str) -> Result<JobStatus> {
        self.job_store
            .get(job_id)
            .await?
            .map(JobStatus::from)
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))
    }

    /// Cancel a job that has not been leased yet
    pub async fn cancel(&self, job_id: &str) -> Result<CancelOutcome> {
        let outcome = self.job_store.cancel(job_id).await?;
        info!(job_id = %job_id, outcome = ?outcome, "Cancel requested");
        Ok(outcome)
    }

    pub async fn register_recurring_schedule(
        &self,
        req: RegisterScheduleRequest,
    ) -> Result<ScheduleId> {
        if !self.registry.contains(&req.task_name) {
            warn!(
                schedule = %req.name,
                task_name = %req.task_name,
                "Registering schedule for unregistered task"
            );
        }
        let name = req.name.clone();
        let schedule_id = schedule::register(
            self.schedule_store.as_ref(),
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            req,
        )
        .await?;
        info!(schedule_id = %schedule_id, schedule = %name, "Recurring schedule registered");
        Ok(schedule_id)
    }

    pub async fn unregister_schedule(&self, name: &str) -> Result<bool> {
        let removed = self.schedule_store.delete_schedule(name).await?;
        if removed {
            info!(schedule = %name, "Recurring schedule removed");
        }
        Ok(removed)
    }

    pub async fn list_schedules(&self) -> Result<Vec<RecurringSchedule>> {
        self.schedule_store.list_schedules().await
    }

    /// Job count per state
    pub async fn job_counts(&self) -> Result<BTreeMap<JobState, i64>> {
        let mut counts = BTreeMap::new();
        for state in JobState::ALL {
            counts.insert(state, self.job_store.count_by_state(state).await?);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::schedule_store::mocks::InMemoryScheduleStore;
    use crate::port::task_handler::mocks::MockHandler;
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use serde_json::json;

    struct Fixture {
        clock: Arc<ManualTimeProvider>,
        jobs: Arc<InMemoryJobStore>,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualTimeProvider::new(1_000_000));
        let jobs = Arc::new(InMemoryJobStore::new(clock.clone()));
        let schedules = Arc::new(InMemoryScheduleStore::new(jobs.clone()));
        let mut registry = TaskRegistry::new();
        registry
            .register("send_email", MockHandler::succeeding())
            .unwrap();
        let dispatcher = Dispatcher::new(
            jobs.clone(),
            schedules,
            Arc::new(registry),
            Arc::new(SequentialIdProvider::new("job")),
            clock.clone(),
        );
        Fixture {
            clock,
            jobs,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn test_submit_then_status() {
        let f = fixture();
        let receipt = f
            .dispatcher
            .submit(SubmitRequest::new("send_email", json!({"to": "a@b.c"})))
            .await
            .unwrap();
        assert_eq!(receipt.state, JobState::Pending);
        assert!(!receipt.deduplicated);

        let status = f.dispatcher.get_status(&receipt.job_id).await.unwrap();
        assert_eq!(status.state, JobState::Pending);
        assert_eq!(status.attempt_count, 0);
        assert_eq!(status.max_attempts, 5);
    }

    #[tokio::test]
    async fn test_delayed_submit_is_scheduled() {
        let f = fixture();
        let receipt = f
            .dispatcher
            .submit(SubmitRequest::new("send_email", json!({})).with_delay_seconds(60))
            .await
            .unwrap();
        assert_eq!(receipt.state, JobState::Scheduled);
        let status = f.dispatcher.get_status(&receipt.job_id).await.unwrap();
        assert_eq!(status.not_before, f.clock.now_millis() + 60_000);
    }

    #[tokio::test]
    async fn test_dedup_key_yields_one_job() {
        let f = fixture();
        let req = SubmitRequest::new("send_email", json!({})).with_dedup_key("order-1");
        let first = f.dispatcher.submit(req.clone()).await.unwrap();
        let second = f.dispatcher.submit(req).await.unwrap();
        assert_eq!(first.job_id, second.job_id);
        assert!(second.deduplicated);
        assert_eq!(f.jobs.len(), 1);

        // without a key, two jobs
        f.dispatcher
            .submit(SubmitRequest::new("send_email", json!({})))
            .await
            .unwrap();
        f.dispatcher
            .submit(SubmitRequest::new("send_email", json!({})))
            .await
            .unwrap();
        assert_eq!(f.jobs.len(), 3);
    }

    #[tokio::test]
    async fn test_unregistered_task_is_accepted() {
        let f = fixture();
        let receipt = f
            .dispatcher
            .submit(SubmitRequest::new("unregistered_task", json!({})))
            .await
            .unwrap();
        assert_eq!(receipt.state, JobState::Pending);
    }

    #[tokio::test]
    async fn test_invalid_request_writes_nothing() {
        let f = fixture();
        let err = f
            .dispatcher
            .submit(SubmitRequest::new("send_email", json!({})).with_priority(500))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(f.jobs.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job_status_is_not_found() {
        let f = fixture();
        let err = f.dispatcher.get_status("nope").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_outcomes() {
        let f = fixture();
        let receipt = f
            .dispatcher
            .submit(SubmitRequest::new("send_email", json!({})))
            .await
            .unwrap();
        assert_eq!(
            f.dispatcher.cancel(&receipt.job_id).await.unwrap(),
            CancelOutcome::Cancelled
        );
        assert_eq!(
            f.dispatcher.cancel(&receipt.job_id).await.unwrap(),
            CancelOutcome::NotCancellable(JobState::Cancelled)
        );
        assert_eq!(
            f.dispatcher.cancel("missing").await.unwrap(),
            CancelOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let f = fixture();
        f.jobs.set_unavailable(true);
        let err = f
            .dispatcher
            .submit(SubmitRequest::new("send_email", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_schedule_registration() {
        let f = fixture();
        let id = f
            .dispatcher
            .register_recurring_schedule(RegisterScheduleRequest::every(
                "cleanup",
                3600,
                "cleanup_expired_orders",
            ))
            .await
            .unwrap();
        let dup = f
            .dispatcher
            .register_recurring_schedule(RegisterScheduleRequest::cron(
                "cleanup",
                "0 * * * *",
                "cleanup_expired_orders",
            ))
            .await
            .unwrap_err();
        assert!(matches!(dup, AppError::Conflict(_)));

        let listed = f.dispatcher.list_schedules().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);

        assert!(f.dispatcher.unregister_schedule("cleanup").await.unwrap());
        assert!(!f.dispatcher.unregister_schedule("cleanup").await.unwrap());
    }

    #[tokio::test]
    async fn test_schedule_requires_one_cadence() {
        let f = fixture();
        let mut req = RegisterScheduleRequest::every("both", 60, "send_email");
        req.cron = Some("* * * * *".into());
        assert!(matches!(
            f.dispatcher.register_recurring_schedule(req).await,
            Err(AppError::Validation(_))
        ));

        let bad_cron = RegisterScheduleRequest::cron("bad", "61 * * * *", "send_email");
        assert!(matches!(
            f.dispatcher.register_recurring_schedule(bad_cron).await,
            Err(AppError::Schedule(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_interval_is_rejected_without_writing() {
        let f = fixture();
        let huge = RegisterScheduleRequest::every("huge", 10_000_000_000_000_000, "send_email");
        assert!(matches!(
            f.dispatcher.register_recurring_schedule(huge).await,
            Err(AppError::Schedule(_))
        ));
        assert!(f.dispatcher.list_schedules().await.unwrap().is_empty());
    }
}
