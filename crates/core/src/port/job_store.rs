// Job Store Port (Interface)

use crate::domain::{Job, JobFailure, JobId, JobState, Progress};
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Result of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new job row was written
    Created(JobId),
    /// A job with the same dedup key already exists; nothing was written
    Duplicate(JobId),
}

impl SubmitOutcome {
    pub fn job_id(&self) -> &JobId {
        match self {
            SubmitOutcome::Created(id) | SubmitOutcome::Duplicate(id) => id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, SubmitOutcome::Duplicate(_))
    }
}

/// Result of a cancellation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "state", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    /// Already leased, running or terminal
    NotCancellable(JobState),
    NotFound,
}

/// Durable job persistence.
///
/// Every mutation is a single conditional update over state and lease fields, so
/// concurrent callers never observe a half-applied transition. Methods returning
/// `bool` report whether the condition matched (owner, state, unexpired lease).
/// Timestamps come from the store's own clock.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job as given (PENDING or SCHEDULED)
    async fn submit(&self, job: &Job) -> Result<SubmitOutcome>;

    /// Atomically lease the next eligible job, if any.
    ///
    /// `eligible_task_names = None` leases any task.
    async fn try_lease(
        &self,
        worker_id: &str,
        lease_ms: i64,
        eligible_task_names: Option<&[String]>,
    ) -> Result<Option<Job>>;

    /// LEASED -> RUNNING
    async fn mark_running(&self, job_id: &str, worker_id: &str) -> Result<bool>;

    async fn renew_lease(&self, job_id: &str, worker_id: &str, extension_ms: i64) -> Result<bool>;

    async fn record_progress(
        &self,
        job_id: &str,
        worker_id: &str,
        progress: &Progress,
    ) -> Result<bool>;

    /// RUNNING -> SUCCEEDED
    async fn complete(
        &self,
        job_id: &str,
        worker_id: &str,
        result: &serde_json::Value,
    ) -> Result<bool>;

    /// RUNNING -> FAILED
    async fn fail(&self, job_id: &str, worker_id: &str, failure: &JobFailure) -> Result<bool>;

    /// FAILED -> SCHEDULED
    async fn schedule_retry(&self, job_id: &str, not_before: i64) -> Result<bool>;

    /// FAILED -> DEAD
    async fn mark_dead(&self, job_id: &str) -> Result<bool>;

    /// Return jobs with expired leases to PENDING (or DEAD when out of attempts)
    async fn reclaim_expired(&self) -> Result<Vec<Job>>;

    /// FAILED jobs whose lease expired before a retry decision was persisted
    async fn find_stranded_failures(&self) -> Result<Vec<Job>>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>>;

    /// PENDING|SCHEDULED -> CANCELLED
    async fn cancel(&self, job_id: &str) -> Result<CancelOutcome>;

    async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>>;

    async fn count_by_state(&self, state: JobState) -> Result<i64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::queue::dequeue_order;
    use crate::error::AppError;
    use crate::port::TimeProvider;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory job store driven by the domain transition methods.
    ///
    /// A single mutex stands in for SQLite's writer serialization.
    pub struct InMemoryJobStore {
        jobs: Mutex<Vec<Job>>,
        time: Arc<dyn TimeProvider>,
        unavailable: AtomicBool,
    }

    impl InMemoryJobStore {
        pub fn new(time: Arc<dyn TimeProvider>) -> Self {
            Self {
                jobs: Mutex::new(Vec::new()),
                time,
                unavailable: AtomicBool::new(false),
            }
        }

        /// Make every call fail with `StoreUnavailable`
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        pub fn len(&self) -> usize {
            self.jobs.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        pub fn snapshot(&self) -> Vec<Job> {
            self.jobs.lock().unwrap().clone()
        }

        /// Overwrite a stored job (test setup)
        pub fn put(&self, job: Job) {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.iter_mut().find(|j| j.id == job.id) {
                Some(existing) => *existing = job,
                None => jobs.push(job),
            }
        }

        fn check_available(&self) -> Result<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AppError::StoreUnavailable("store offline".to_string()));
            }
            Ok(())
        }

        fn with_job<F>(&self, job_id: &str, f: F) -> Result<bool>
        where
            F: FnOnce(&mut Job, i64) -> bool,
        {
            self.check_available()?;
            let now = self.time.now_millis();
            let mut jobs = self.jobs.lock().unwrap();
            Ok(jobs
                .iter_mut()
                .find(|j| j.id == job_id)
                .map(|job| f(job, now))
                .unwrap_or(false))
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn submit(&self, job: &Job) -> Result<SubmitOutcome> {
            self.check_available()?;
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(key) = &job.dedup_key {
                if let Some(existing) = jobs.iter().find(|j| j.dedup_key.as_ref() == Some(key)) {
                    return Ok(SubmitOutcome::Duplicate(existing.id.clone()));
                }
            }
            if jobs.iter().any(|j| j.id == job.id) {
                return Err(AppError::Database(format!("duplicate job id {}", job.id)));
            }
            jobs.push(job.clone());
            Ok(SubmitOutcome::Created(job.id.clone()))
        }

        async fn try_lease(
            &self,
            worker_id: &str,
            lease_ms: i64,
            eligible_task_names: Option<&[String]>,
        ) -> Result<Option<Job>> {
            self.check_available()?;
            let now = self.time.now_millis();
            let mut jobs = self.jobs.lock().unwrap();

            // Vec order is insertion order, and sort_by is stable
            let mut candidates: Vec<usize> = (0..jobs.len())
                .filter(|&i| jobs[i].is_eligible(now))
                .filter(|&i| {
                    eligible_task_names.map_or(true, |names| {
                        names.iter().any(|n| n == jobs[i].task_name.as_str())
                    })
                })
                .collect();
            candidates.sort_by(|&a, &b| dequeue_order(&jobs[a], &jobs[b]));

            let Some(&index) = candidates.first() else {
                return Ok(None);
            };
            let job = &mut jobs[index];
            job.lease(worker_id, lease_ms, now)?;
            Ok(Some(job.clone()))
        }

        async fn mark_running(&self, job_id: &str, worker_id: &str) -> Result<bool> {
            self.with_job(job_id, |job, now| {
                job.has_active_lease(now) && job.start(worker_id, now).is_ok()
            })
        }

        async fn renew_lease(
            &self,
            job_id: &str,
            worker_id: &str,
            extension_ms: i64,
        ) -> Result<bool> {
            self.with_job(job_id, |job, now| {
                job.renew_lease(worker_id, extension_ms, now).is_ok()
            })
        }

        async fn record_progress(
            &self,
            job_id: &str,
            worker_id: &str,
            progress: &Progress,
        ) -> Result<bool> {
            self.with_job(job_id, |job, now| {
                if job.lease_owner.as_deref() != Some(worker_id) || !job.state.holds_lease() {
                    return false;
                }
                job.progress = Some(progress.clone());
                job.updated_at = now;
                true
            })
        }

        async fn complete(
            &self,
            job_id: &str,
            worker_id: &str,
            result: &serde_json::Value,
        ) -> Result<bool> {
            self.with_job(job_id, |job, now| {
                job.succeed(worker_id, result.clone(), now).is_ok()
            })
        }

        async fn fail(&self, job_id: &str, worker_id: &str, failure: &JobFailure) -> Result<bool> {
            self.with_job(job_id, |job, now| job.fail(worker_id, failure, now).is_ok())
        }

        async fn schedule_retry(&self, job_id: &str, not_before: i64) -> Result<bool> {
            self.with_job(job_id, |job, now| job.schedule_retry(not_before, now).is_ok())
        }

        async fn mark_dead(&self, job_id: &str) -> Result<bool> {
            self.with_job(job_id, |job, now| job.bury(now).is_ok())
        }

        async fn reclaim_expired(&self) -> Result<Vec<Job>> {
            self.check_available()?;
            let now = self.time.now_millis();
            let mut jobs = self.jobs.lock().unwrap();
            let mut reclaimed = Vec::new();
            for job in jobs
                .iter_mut()
                .filter(|j| j.state.holds_lease() && j.lease_expires_at.is_some_and(|t| t < now))
            {
                job.reclaim(now)?;
                reclaimed.push(job.clone());
            }
            Ok(reclaimed)
        }

        async fn find_stranded_failures(&self) -> Result<Vec<Job>> {
            self.check_available()?;
            let now = self.time.now_millis();
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .filter(|j| {
                    j.state == JobState::Failed && j.lease_expires_at.map_or(true, |t| t < now)
                })
                .cloned()
                .collect())
        }

        async fn get(&self, job_id: &str) -> Result<Option<Job>> {
            self.check_available()?;
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .find(|j| j.id == job_id)
                .cloned())
        }

        async fn cancel(&self, job_id: &str) -> Result<CancelOutcome> {
            self.check_available()?;
            let now = self.time.now_millis();
            let mut jobs = self.jobs.lock().unwrap();
            let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) else {
                return Ok(CancelOutcome::NotFound);
            };
            match job.cancel(now) {
                Ok(()) => Ok(CancelOutcome::Cancelled),
                Err(_) => Ok(CancelOutcome::NotCancellable(job.state)),
            }
        }

        async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>> {
            self.check_available()?;
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .filter(|j| j.state == state)
                .cloned()
                .collect())
        }

        async fn count_by_state(&self, state: JobState) -> Result<i64> {
            Ok(self.find_by_state(state).await?.len() as i64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::InMemoryJobStore;
    use super::*;
    use crate::domain::ErrorKind;
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use std::sync::Arc;

    fn store() -> (Arc<ManualTimeProvider>, InMemoryJobStore) {
        let clock = Arc::new(ManualTimeProvider::new(1_000));
        let store = InMemoryJobStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_lease_order_priority_then_fifo() {
        let (_clock, store) = store();
        let low = Job::new_test("a", 1_000).with_priority(-5);
        let first = Job::new_test("a", 1_000);
        let second = Job::new_test("a", 1_000);
        let urgent = Job::new_test("a", 1_000).with_priority(10);
        for job in [&low, &first, &second, &urgent] {
            store.submit(job).await.unwrap();
        }

        let mut order = Vec::new();
        while let Some(job) = store.try_lease("w", 10_000, None).await.unwrap() {
            order.push(job.id);
        }
        assert_eq!(order, vec![urgent.id, first.id, second.id, low.id]);
    }

    #[tokio::test]
    async fn test_dedup_key_returns_existing() {
        let (_clock, store) = store();
        let a = Job::new_test("a", 1_000).with_dedup_key(Some("order-7".into()));
        let b = Job::new_test("a", 1_000).with_dedup_key(Some("order-7".into()));
        assert_eq!(
            store.submit(&a).await.unwrap(),
            SubmitOutcome::Created(a.id.clone())
        );
        assert_eq!(
            store.submit(&b).await.unwrap(),
            SubmitOutcome::Duplicate(a.id.clone())
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_renew_fails_after_expiry() {
        let (clock, store) = store();
        let job = Job::new_test("a", 1_000);
        store.submit(&job).await.unwrap();
        store.try_lease("w1", 500, None).await.unwrap().unwrap();
        assert!(store.renew_lease(&job.id, "w1", 500).await.unwrap());
        assert!(!store.renew_lease(&job.id, "w2", 500).await.unwrap());

        clock.advance(2_000);
        assert!(!store.renew_lease(&job.id, "w1", 500).await.unwrap());
    }

    #[tokio::test]
    async fn test_stranded_failure_detected_after_lease_expiry() {
        let (clock, store) = store();
        let job = Job::new_test("a", 1_000);
        store.submit(&job).await.unwrap();
        store.try_lease("w1", 500, None).await.unwrap();
        store.mark_running(&job.id, "w1").await.unwrap();
        store
            .fail(&job.id, "w1", &JobFailure::new(ErrorKind::Transient, "boom"))
            .await
            .unwrap();
        assert!(store.find_stranded_failures().await.unwrap().is_empty());

        clock.advance(1_000);
        assert_eq!(store.find_stranded_failures().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let (_clock, store) = store();
        store.set_unavailable(true);
        let err = store.get("x").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
