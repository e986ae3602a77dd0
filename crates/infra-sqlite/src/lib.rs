// Courier Infrastructure - SQLite Adapter
// Implements: JobStore, ScheduleStore, Maintenance

mod connection;
mod error;
mod job_store;
mod maintenance_impl;
mod migration;
mod schedule_store;

pub use connection::create_pool;
pub use job_store::SqliteJobStore;
pub use maintenance_impl::SqliteMaintenance;
pub use migration::run_migrations;
pub use schedule_store::SqliteScheduleStore;
