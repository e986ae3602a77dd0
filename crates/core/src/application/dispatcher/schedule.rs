// Recurring schedule registration

use super::validate::{validate_max_attempts, validate_name, validate_payload, validate_priority};
use crate::domain::{
    Cadence, JobPayload, Priority, RecurringSchedule, ScheduleId, TaskName, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_PRIORITY,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, ScheduleStore, TimeProvider};
use serde::{Deserialize, Serialize};

fn default_max_attempts() -> i32 {
    DEFAULT_MAX_ATTEMPTS
}

/// Exactly one of `cron` / `interval_seconds` must be set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterScheduleRequest {
    pub name: String,

    #[serde(default)]
    pub cron: Option<String>,

    #[serde(default)]
    pub interval_seconds: Option<u64>,

    pub task_name: String,

    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
}

impl RegisterScheduleRequest {
    pub fn cron(
        name: impl Into<String>,
        expression: impl Into<String>,
        task_name: impl Into<String>,
    ) -> Self {
        Self::base(name, task_name, Some(expression.into()), None)
    }

    pub fn every(name: impl Into<String>, seconds: u64, task_name: impl Into<String>) -> Self {
        Self::base(name, task_name, None, Some(seconds))
    }

    fn base(
        name: impl Into<String>,
        task_name: impl Into<String>,
        cron: Option<String>,
        interval_seconds: Option<u64>,
    ) -> Self {
        Self {
            name: name.into(),
            cron,
            interval_seconds,
            task_name: task_name.into(),
            payload: serde_json::Value::Null,
            priority: DEFAULT_PRIORITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn cadence(&self) -> Result<Cadence> {
        match (&self.cron, self.interval_seconds) {
            (Some(expression), None) => Ok(Cadence::cron(expression.clone())?),
            (None, Some(seconds)) => Ok(Cadence::interval(seconds)?),
            _ => Err(AppError::Validation(
                "exactly one of cron or interval_seconds is required".into(),
            )),
        }
    }
}

pub async fn register(
    schedule_store: &dyn ScheduleStore,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    req: RegisterScheduleRequest,
) -> Result<ScheduleId> {
    validate_name("schedule name", &req.name)?;
    validate_name("task_name", &req.task_name)?;
    validate_priority(req.priority)?;
    validate_max_attempts(req.max_attempts)?;
    validate_payload(&req.payload)?;
    let cadence = req.cadence()?;

    let mut schedule = RecurringSchedule::new(
        id_provider.generate_id(),
        req.name,
        cadence,
        TaskName::new(req.task_name),
        JobPayload::from_value(req.payload)?,
        time_provider.now_millis(),
    )?;
    schedule.priority = req.priority;
    schedule.max_attempts = req.max_attempts;

    schedule_store.insert_schedule(&schedule).await?;
    Ok(schedule.id)
}
