// Recurring Schedule Domain Model

use crate::domain::job::{Job, JobPayload, Priority, TaskName};
use crate::domain::queue::{DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Schedule ID (UUID v4)
pub type ScheduleId = String;

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Interval must be between 1 and {max} seconds", max = MAX_INTERVAL_SECONDS)]
    InvalidInterval,

    #[error("Cadence '{0}' has no upcoming occurrence")]
    NoUpcomingRun(String),

    #[error("Timestamp out of range: {0}")]
    InvalidTimestamp(i64),
}

/// Longest accepted fixed interval (366 days)
pub const MAX_INTERVAL_SECONDS: u64 = 366 * 24 * 60 * 60;

/// How often a recurring schedule fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cadence {
    /// Unix cron (5 fields) or extended cron (6/7 fields), evaluated in UTC
    Cron { expression: String },
    /// Fixed interval
    Interval { seconds: u64 },
}

/// Convert a 5-field Unix cron expression to the 7-field form the `cron` crate parses
/// (seconds prepended as 0, year appended as *).
fn to_cron_crate_format(expression: &str) -> String {
    match expression.split_whitespace().count() {
        5 => format!("0 {} *", expression),
        _ => expression.to_string(),
    }
}

fn parse_cron(expression: &str) -> Result<cron::Schedule, ScheduleError> {
    cron::Schedule::from_str(&to_cron_crate_format(expression)).map_err(|e| {
        ScheduleError::InvalidCron {
            expression: expression.to_string(),
            reason: e.to_string(),
        }
    })
}

impl Cadence {
    /// Parse and validate a cron expression
    pub fn cron(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        parse_cron(&expression)?;
        Ok(Cadence::Cron { expression })
    }

    pub fn interval(seconds: u64) -> Result<Self, ScheduleError> {
        if !(1..=MAX_INTERVAL_SECONDS).contains(&seconds) {
            return Err(ScheduleError::InvalidInterval);
        }
        Ok(Cadence::Interval { seconds })
    }

    /// First occurrence strictly after `now_millis`
    pub fn first_run(&self, now_millis: i64) -> Result<i64, ScheduleError> {
        match self {
            Cadence::Cron { expression } => next_cron_occurrence(expression, now_millis),
            Cadence::Interval { seconds } => now_millis
                .checked_add(interval_millis(*seconds)?)
                .ok_or(ScheduleError::InvalidTimestamp(now_millis)),
        }
    }

    /// Next occurrence strictly after `now_millis`, skipping any occurrences
    /// missed between `previous` and `now_millis`.
    ///
    /// Intervals stay aligned to the grid that starts at `previous`.
    pub fn next_after(&self, previous: i64, now_millis: i64) -> Result<i64, ScheduleError> {
        match self {
            Cadence::Cron { expression } => next_cron_occurrence(expression, now_millis),
            Cadence::Interval { seconds } => {
                let step = interval_millis(*seconds)?;
                if previous > now_millis {
                    return Ok(previous);
                }
                let missed = (now_millis - previous) / step;
                (missed + 1)
                    .checked_mul(step)
                    .and_then(|offset| previous.checked_add(offset))
                    .ok_or(ScheduleError::InvalidTimestamp(now_millis))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Cadence::Cron { expression } => expression.clone(),
            Cadence::Interval { seconds } => format!("every {}s", seconds),
        }
    }
}

fn interval_millis(seconds: u64) -> Result<i64, ScheduleError> {
    i64::try_from(seconds)
        .ok()
        .and_then(|s| s.checked_mul(1000))
        .filter(|ms| *ms > 0)
        .ok_or(ScheduleError::InvalidInterval)
}

fn next_cron_occurrence(expression: &str, now_millis: i64) -> Result<i64, ScheduleError> {
    let schedule = parse_cron(expression)?;
    let now: DateTime<Utc> = DateTime::from_timestamp_millis(now_millis)
        .ok_or(ScheduleError::InvalidTimestamp(now_millis))?;

    schedule
        .after(&now)
        .next()
        .map(|next| next.timestamp_millis())
        .ok_or_else(|| ScheduleError::NoUpcomingRun(expression.to_string()))
}

/// A template that produces Jobs on a cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringSchedule {
    pub id: ScheduleId,
    pub name: String,
    pub cadence: Cadence,
    pub task_name: TaskName,
    pub payload: JobPayload,
    pub priority: Priority,
    pub max_attempts: i32,
    pub next_run_at: i64,
    pub last_fired_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RecurringSchedule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        cadence: Cadence,
        task_name: TaskName,
        payload: JobPayload,
        now_millis: i64,
    ) -> Result<Self, ScheduleError> {
        let next_run_at = cadence.first_run(now_millis)?;
        Ok(Self {
            id: id.into(),
            name: name.into(),
            cadence,
            task_name,
            payload,
            priority: DEFAULT_PRIORITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            next_run_at,
            last_fired_at: None,
            created_at: now_millis,
            updated_at: now_millis,
        })
    }

    pub fn is_due(&self, now_millis: i64) -> bool {
        self.next_run_at <= now_millis
    }

    /// Watermark to store after firing at `now_millis`
    pub fn advance(&self, now_millis: i64) -> Result<i64, ScheduleError> {
        self.cadence.next_after(self.next_run_at, now_millis)
    }

    /// Dedup key for the occurrence at the current watermark, so one
    /// occurrence can never produce two jobs.
    pub fn occurrence_key(&self) -> String {
        format!("schedule:{}:{}", self.id, self.next_run_at)
    }

    /// Build the job for the current occurrence
    pub fn spawn_job(&self, job_id: impl Into<String>, now_millis: i64) -> Job {
        Job::new(
            job_id,
            now_millis,
            self.task_name.clone(),
            self.payload.clone(),
        )
        .with_priority(self.priority)
        .with_max_attempts(self.max_attempts)
        .with_dedup_key(Some(self.occurrence_key()))
        .with_schedule_id(self.id.clone())
    }
}
