// Application Layer - Use Cases and Services

pub mod config;
pub mod dispatcher;
pub mod maintenance;
pub mod recovery;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod worker;

// Re-exports
pub use config::EngineConfig;
pub use dispatcher::{
    Dispatcher, JobStatus, RegisterScheduleRequest, SubmitReceipt, SubmitRequest,
};
pub use maintenance::MaintenanceScheduler;
pub use recovery::{LeaseSweeper, SweepReport};
pub use registry::TaskRegistry;
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::Scheduler;
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, WorkerPool};
