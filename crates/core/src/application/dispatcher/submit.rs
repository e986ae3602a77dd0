// Submit Use Case

use super::validate::{
    validate_dedup_key, validate_max_attempts, validate_name, validate_payload, validate_priority,
};
use crate::domain::{
    Job, JobId, JobPayload, JobState, Priority, TaskName, DEFAULT_MAX_ATTEMPTS,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobStore, SubmitOutcome, TimeProvider};
use serde::{Deserialize, Serialize};

fn default_max_attempts() -> i32 {
    DEFAULT_MAX_ATTEMPTS
}

/// Submission request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub task_name: String,

    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    /// Delay before the first attempt
    #[serde(default)]
    pub delay_seconds: i64,

    /// Idempotency key: a second submission with the same key returns the first job
    #[serde(default)]
    pub dedup_key: Option<String>,
}

impl SubmitRequest {
    pub fn new(task_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_name: task_name.into(),
            payload,
            priority: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_seconds: 0,
            dedup_key: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delay_seconds(mut self, delay_seconds: i64) -> Self {
        self.delay_seconds = delay_seconds;
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }
}

/// Submission result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub job_id: JobId,
    pub state: JobState,
    /// True when an existing job with the same dedup key was returned
    pub deduplicated: bool,
}

/// Validate a submit request (no store access)
pub fn validate_submit(req: &SubmitRequest) -> Result<()> {
    validate_name("task_name", &req.task_name)?;
    validate_priority(req.priority)?;
    validate_max_attempts(req.max_attempts)?;
    if req.delay_seconds < 0 {
        return Err(AppError::Validation(
            "delay_seconds cannot be negative".into(),
        ));
    }
    validate_dedup_key(req.dedup_key.as_deref())?;
    validate_payload(&req.payload)?;
    Ok(())
}

/// Execute submit use case
///
/// # Arguments
///
/// * `job_store` - Job store
/// * `id_provider` - ID generator (injected for determinism)
/// * `time_provider` - Time provider (injected for determinism)
/// * `req` - Submit request
pub async fn execute(
    job_store: &dyn JobStore,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    req: SubmitRequest,
) -> Result<SubmitReceipt> {
    validate_submit(&req)?;

    let now = time_provider.now_millis();
    let not_before = now.saturating_add(req.delay_seconds.saturating_mul(1000));
    let payload = JobPayload::from_value(req.payload)?;

    let job = Job::new(
        id_provider.generate_id(),
        now,
        TaskName::new(req.task_name),
        payload,
    )
    .with_priority(req.priority)
    .with_max_attempts(req.max_attempts)
    .with_not_before(not_before)
    .with_dedup_key(req.dedup_key);

    match job_store.submit(&job).await? {
        SubmitOutcome::Created(job_id) => Ok(SubmitReceipt {
            job_id,
            state: job.state,
            deduplicated: false,
        }),
        SubmitOutcome::Duplicate(job_id) => {
            let existing = job_store
                .get(&job_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;
            Ok(SubmitReceipt {
                job_id,
                state: existing.state,
                deduplicated: true,
            })
        }
    }
}
