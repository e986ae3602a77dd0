// Job Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::failure::{ErrorKind, JobFailure};
use crate::domain::queue::{DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Job ID (UUID v4)
pub type JobId = String;

/// Priority (higher number = dequeued first)
pub type Priority = i32;

/// Job lifecycle state
///
/// ```text
/// PENDING|SCHEDULED -> LEASED -> RUNNING -> SUCCEEDED
///                                        -> FAILED -> SCHEDULED (retry)
///                                                  -> DEAD
/// LEASED|RUNNING -> PENDING | DEAD          (lease reclaimed)
/// PENDING|SCHEDULED -> CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Scheduled,
    Leased,
    Running,
    Succeeded,
    Failed,
    Dead,
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 8] = [
        JobState::Pending,
        JobState::Scheduled,
        JobState::Leased,
        JobState::Running,
        JobState::Succeeded,
        JobState::Failed,
        JobState::Dead,
        JobState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Scheduled => "SCHEDULED",
            JobState::Leased => "LEASED",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
            JobState::Dead => "DEAD",
            JobState::Cancelled => "CANCELLED",
        }
    }

    /// Terminal states accept no further mutation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Dead | JobState::Cancelled
        )
    }

    /// States a worker may lease from
    pub fn is_leasable(&self) -> bool {
        matches!(self, JobState::Pending | JobState::Scheduled)
    }

    /// States that carry a lease
    pub fn holds_lease(&self) -> bool {
        matches!(self, JobState::Leased | JobState::Running)
    }

    /// The legal transition graph
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending | Scheduled, Leased)
                | (Pending | Scheduled, Cancelled)
                | (Leased, Running)
                | (Leased | Running, Pending)
                | (Leased | Running, Dead)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Failed, Scheduled)
                | (Failed, Dead)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| DomainError::UnknownState(s.to_string()))
    }
}

/// Name of a registered task body
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskName(String);

impl TaskName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job Payload: a JSON object of task arguments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPayload(serde_json::Map<String, serde_json::Value>);

impl JobPayload {
    pub fn new(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map)
    }

    /// Accepts only JSON objects (`null` becomes an empty payload)
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => Ok(Self(map)),
            serde_json::Value::Null => Ok(Self::default()),
            other => Err(DomainError::InvalidPayload(format!(
                "payload must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone())
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Last progress report from a running task body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub percent: u8,
    pub message: Option<String>,
}

/// Job Entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub task_name: TaskName,
    pub payload: JobPayload,
    pub state: JobState,
    pub priority: Priority,

    // Retry accounting
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub not_before: i64, // epoch ms

    // Lease
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<i64>,

    // Outcome
    pub last_error: Option<String>,
    pub last_error_kind: Option<ErrorKind>,
    pub result: Option<serde_json::Value>,
    pub progress: Option<Progress>,

    // Provenance
    pub dedup_key: Option<String>,
    pub schedule_id: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
    pub finished_at: Option<i64>,
}

impl Job {
    /// Create a new PENDING job, eligible immediately
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `now_millis` - Creation timestamp in epoch ms (injected, not system time)
    /// * `task_name` - Registered task body to run
    /// * `payload` - Task arguments
    pub fn new(
        id: impl Into<String>,
        now_millis: i64,
        task_name: TaskName,
        payload: JobPayload,
    ) -> Self {
        Self {
            id: id.into(),
            task_name,
            payload,
            state: JobState::Pending,
            priority: DEFAULT_PRIORITY,
            attempt_count: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            not_before: now_millis,
            lease_owner: None,
            lease_expires_at: None,
            last_error: None,
            last_error_kind: None,
            result: None,
            progress: None,
            dedup_key: None,
            schedule_id: None,
            created_at: now_millis,
            updated_at: now_millis,
            finished_at: None,
        }
    }

    /// Create a test job with a deterministic ID (test-1, test-2, ...)
    ///
    /// **Note**: only for tests. Production code injects ID and time via providers.
    pub fn new_test(task_name: &str, now_millis: i64) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self::new(
            format!("test-{}", counter),
            now_millis,
            TaskName::new(task_name),
            JobPayload::default(),
        )
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay the first attempt. A future `not_before` makes the job SCHEDULED.
    pub fn with_not_before(mut self, not_before: i64) -> Self {
        self.not_before = not_before;
        self.state = if not_before > self.created_at {
            JobState::Scheduled
        } else {
            JobState::Pending
        };
        self
    }

    pub fn with_dedup_key(mut self, dedup_key: Option<String>) -> Self {
        self.dedup_key = dedup_key;
        self
    }

    pub fn with_schedule_id(mut self, schedule_id: impl Into<String>) -> Self {
        self.schedule_id = Some(schedule_id.into());
        self
    }

    /// Leasable and past its `not_before`
    pub fn is_eligible(&self, now_millis: i64) -> bool {
        self.state.is_leasable() && self.not_before <= now_millis
    }

    pub fn has_active_lease(&self, now_millis: i64) -> bool {
        self.state.holds_lease() && self.lease_expires_at.is_some_and(|t| t >= now_millis)
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    fn transition(&mut self, next: JobState, now_millis: i64) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.updated_at = now_millis;
        if next.is_terminal() {
            self.finished_at = Some(now_millis);
        }
        Ok(())
    }

    fn check_owner(&self, worker_id: &str) -> Result<()> {
        if self.lease_owner.as_deref() != Some(worker_id) {
            return Err(DomainError::LeaseMismatch {
                job_id: self.id.clone(),
                worker_id: worker_id.to_string(),
            });
        }
        Ok(())
    }

    fn clear_lease(&mut self) {
        self.lease_owner = None;
        self.lease_expires_at = None;
    }

    /// PENDING|SCHEDULED -> LEASED (counts one attempt)
    pub fn lease(&mut self, worker_id: &str, lease_ms: i64, now_millis: i64) -> Result<()> {
        if self.not_before > now_millis {
            return Err(DomainError::ValidationError(format!(
                "job {} is not eligible before {}",
                self.id, self.not_before
            )));
        }
        self.transition(JobState::Leased, now_millis)?;
        self.lease_owner = Some(worker_id.to_string());
        self.lease_expires_at = Some(now_millis + lease_ms);
        self.attempt_count += 1;
        Ok(())
    }

    /// LEASED -> RUNNING
    pub fn start(&mut self, worker_id: &str, now_millis: i64) -> Result<()> {
        self.check_owner(worker_id)?;
        self.transition(JobState::Running, now_millis)
    }

    /// Push the lease expiry out; the lease must still be live
    pub fn renew_lease(&mut self, worker_id: &str, lease_ms: i64, now_millis: i64) -> Result<()> {
        self.check_owner(worker_id)?;
        if !self.has_active_lease(now_millis) {
            return Err(DomainError::LeaseMismatch {
                job_id: self.id.clone(),
                worker_id: worker_id.to_string(),
            });
        }
        self.lease_expires_at = Some(now_millis + lease_ms);
        self.updated_at = now_millis;
        Ok(())
    }

    /// RUNNING -> SUCCEEDED
    pub fn succeed(
        &mut self,
        worker_id: &str,
        result: serde_json::Value,
        now_millis: i64,
    ) -> Result<()> {
        self.check_owner(worker_id)?;
        self.transition(JobState::Succeeded, now_millis)?;
        self.result = Some(result);
        self.clear_lease();
        Ok(())
    }

    /// RUNNING -> FAILED (lease kept until the retry decision lands)
    pub fn fail(&mut self, worker_id: &str, failure: &JobFailure, now_millis: i64) -> Result<()> {
        self.check_owner(worker_id)?;
        self.transition(JobState::Failed, now_millis)?;
        self.last_error = Some(failure.message.clone());
        self.last_error_kind = Some(failure.kind);
        Ok(())
    }

    /// FAILED -> SCHEDULED
    pub fn schedule_retry(&mut self, not_before: i64, now_millis: i64) -> Result<()> {
        self.transition(JobState::Scheduled, now_millis)?;
        self.not_before = not_before;
        self.clear_lease();
        Ok(())
    }

    /// FAILED -> DEAD
    pub fn bury(&mut self, now_millis: i64) -> Result<()> {
        if self.state != JobState::Failed {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: JobState::Dead.to_string(),
            });
        }
        self.transition(JobState::Dead, now_millis)?;
        self.clear_lease();
        Ok(())
    }

    /// LEASED|RUNNING with an expired lease -> PENDING, or DEAD once attempts are used up
    pub fn reclaim(&mut self, now_millis: i64) -> Result<()> {
        if self.has_active_lease(now_millis) {
            return Err(DomainError::ValidationError(format!(
                "lease on job {} has not expired",
                self.id
            )));
        }
        if self.attempts_exhausted() {
            self.transition(JobState::Dead, now_millis)?;
            self.last_error = Some("Lease expired with no attempts left".to_string());
            self.last_error_kind = Some(ErrorKind::LeaseExpired);
        } else {
            self.transition(JobState::Pending, now_millis)?;
            self.not_before = now_millis;
        }
        self.clear_lease();
        Ok(())
    }

    /// PENDING|SCHEDULED -> CANCELLED
    pub fn cancel(&mut self, now_millis: i64) -> Result<()> {
        self.transition(JobState::Cancelled, now_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in JobState::ALL.into_iter().filter(JobState::is_terminal) {
            for to in JobState::ALL {
                assert!(
                    !from.can_transition_to(to),
                    "{} must not transition to {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_succeeded_cannot_run_again() {
        assert!(!JobState::Succeeded.can_transition_to(JobState::Running));
        assert!(!JobState::Pending.can_transition_to(JobState::Running));
        assert!(!JobState::Failed.can_transition_to(JobState::Leased));
    }

    #[test]
    fn test_happy_path() {
        let mut job = Job::new_test("send_email", 1_000);
        job.lease("w1", 30_000, 1_000).unwrap();
        assert_eq!(job.state, JobState::Leased);
        assert_eq!(job.attempt_count, 1);

        job.start("w1", 1_001).unwrap();
        job.succeed("w1", serde_json::json!({"sent": true}), 1_002)
            .unwrap();

        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.finished_at, Some(1_002));
        assert!(job.lease_owner.is_none());
        assert!(job.succeed("w1", serde_json::json!(null), 1_003).is_err());
    }

    #[test]
    fn test_delayed_job_is_scheduled_and_not_eligible() {
        let mut job = Job::new_test("report", 1_000).with_not_before(61_000);
        assert_eq!(job.state, JobState::Scheduled);
        assert!(!job.is_eligible(60_999));
        assert!(job.lease("w1", 1_000, 60_999).is_err());
        assert!(job.is_eligible(61_000));
    }

    #[test]
    fn test_wrong_owner_rejected() {
        let mut job = Job::new_test("send_sms", 0);
        job.lease("w1", 10_000, 0).unwrap();
        assert!(matches!(
            job.start("w2", 1),
            Err(DomainError::LeaseMismatch { .. })
        ));
    }

    #[test]
    fn test_failure_then_retry_then_dead() {
        let mut job = Job::new_test("refund", 0).with_max_attempts(2);
        let failure = JobFailure::new(ErrorKind::Transient, "gateway 503");

        job.lease("w1", 10_000, 0).unwrap();
        job.start("w1", 1).unwrap();
        job.fail("w1", &failure, 2).unwrap();
        assert_eq!(job.last_error_kind, Some(ErrorKind::Transient));
        job.schedule_retry(5_000, 2).unwrap();
        assert_eq!(job.state, JobState::Scheduled);
        assert!(job.lease_owner.is_none());

        job.lease("w2", 10_000, 5_000).unwrap();
        job.start("w2", 5_001).unwrap();
        job.fail("w2", &failure, 5_002).unwrap();
        assert!(job.attempts_exhausted());
        job.bury(5_003).unwrap();
        assert_eq!(job.state, JobState::Dead);
        assert_eq!(job.attempt_count, 2);
    }

    #[test]
    fn test_reclaim_requires_expired_lease() {
        let mut job = Job::new_test("assign_driver", 0);
        job.lease("w1", 1_000, 0).unwrap();
        assert!(job.reclaim(500).is_err());

        job.reclaim(1_001).unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.lease_owner.is_none());
        assert_eq!(job.attempt_count, 1);
    }

    #[test]
    fn test_reclaim_exhausted_job_dies() {
        let mut job = Job::new_test("assign_driver", 0).with_max_attempts(1);
        job.lease("w1", 1_000, 0).unwrap();
        job.start("w1", 1).unwrap();
        job.reclaim(2_000).unwrap();
        assert_eq!(job.state, JobState::Dead);
        assert_eq!(job.last_error_kind, Some(ErrorKind::LeaseExpired));
    }

    #[test]
    fn test_cancel_only_before_lease() {
        let mut queued = Job::new_test("notify", 0);
        queued.cancel(1).unwrap();
        assert_eq!(queued.state, JobState::Cancelled);

        let mut leased = Job::new_test("notify", 0);
        leased.lease("w1", 1_000, 0).unwrap();
        assert!(leased.cancel(1).is_err());
    }

    #[test]
    fn test_payload_must_be_object() {
        assert!(JobPayload::from_value(serde_json::json!({"a": 1})).is_ok());
        assert!(JobPayload::from_value(serde_json::Value::Null).is_ok());
        assert!(JobPayload::from_value(serde_json::json!([1, 2])).is_err());
    }
}
