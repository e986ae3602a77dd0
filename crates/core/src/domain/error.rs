// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unknown job state: {0}")]
    UnknownState(String),

    #[error("Unknown error kind: {0}")]
    UnknownErrorKind(String),

    #[error("Lease on job {job_id} is not held by {worker_id}")]
    LeaseMismatch { job_id: String, worker_id: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
