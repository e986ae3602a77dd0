// Domain Layer - Pure business logic and entities

pub mod error;
pub mod failure;
pub mod job;
pub mod queue;
pub mod schedule;

// Re-exports
pub use error::DomainError;
pub use failure::{ErrorKind, JobFailure};
pub use job::{Job, JobId, JobPayload, JobState, Priority, Progress, TaskName};
pub use queue::{DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY};
pub use schedule::{
    Cadence, RecurringSchedule, ScheduleError, ScheduleId, MAX_INTERVAL_SECONDS,
};
