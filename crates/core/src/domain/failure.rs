// Failure classification for job attempts

use crate::domain::error::DomainError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Why an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Network blips, 5xx from an external service
    Transient,
    /// Validation errors and anything the handler marks as non-retryable
    Permanent,
    /// Hard time limit exceeded
    Timeout,
    /// No handler registered for the task name
    UnknownTask,
    /// Task body panicked
    Panic,
    /// Lease expired with no attempts left
    LeaseExpired,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Transient | ErrorKind::Timeout | ErrorKind::Panic
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "TRANSIENT",
            ErrorKind::Permanent => "PERMANENT",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::UnknownTask => "UNKNOWN_TASK",
            ErrorKind::Panic => "PANIC",
            ErrorKind::LeaseExpired => "LEASE_EXPIRED",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRANSIENT" => Ok(ErrorKind::Transient),
            "PERMANENT" => Ok(ErrorKind::Permanent),
            "TIMEOUT" => Ok(ErrorKind::Timeout),
            "UNKNOWN_TASK" => Ok(ErrorKind::UnknownTask),
            "PANIC" => Ok(ErrorKind::Panic),
            "LEASE_EXPIRED" => Ok(ErrorKind::LeaseExpired),
            other => Err(DomainError::UnknownErrorKind(other.to_string())),
        }
    }
}

/// A recorded attempt failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_task(task_name: &str) -> Self {
        Self::new(
            ErrorKind::UnknownTask,
            format!("No handler registered for task '{}'", task_name),
        )
    }

    pub fn timeout(limit_ms: i64) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("Hard time limit of {}ms exceeded", limit_ms),
        )
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
