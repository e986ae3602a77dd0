// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod job_store;
pub mod maintenance;
pub mod schedule_store;
pub mod task_handler;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use job_store::{CancelOutcome, JobStore, SubmitOutcome};
pub use maintenance::{Maintenance, MaintenanceConfig, MaintenanceStats};
pub use schedule_store::ScheduleStore;
pub use task_handler::{
    handler_fn, FnHandler, TaskContext, TaskControl, TaskError, TaskHandler, TaskOutput,
};
pub use time_provider::TimeProvider;
