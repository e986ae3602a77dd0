//! RPC Request/Response Types
//!
//! Submission and schedule registration reuse the core request types as-is;
//! the rest are thin wrappers shaped for the wire.

use courier_core::domain::{JobState, RecurringSchedule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use courier_core::application::{
    JobStatus, RegisterScheduleRequest, SubmitReceipt, SubmitRequest,
};

/// jobs.status.v1 / jobs.cancel.v1
#[derive(Debug, Deserialize)]
pub struct JobIdRequest {
    pub job_id: String,
}

/// jobs.cancel.v1
#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub cancelled: bool,
    /// Current state when the job could not be cancelled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
}

/// schedules.register.v1
#[derive(Debug, Clone, Serialize)]
pub struct RegisterScheduleResponse {
    pub schedule_id: String,
    pub name: String,
}

/// schedules.unregister.v1
#[derive(Debug, Deserialize)]
pub struct ScheduleNameRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnregisterScheduleResponse {
    pub name: String,
    pub removed: bool,
}

/// schedules.list.v1
#[derive(Debug, Default, Deserialize)]
pub struct ListSchedulesRequest {}

#[derive(Debug, Clone, Serialize)]
pub struct ListSchedulesResponse {
    pub schedules: Vec<RecurringSchedule>,
}

/// admin.stats.v1 - Get system statistics
#[derive(Debug, Default, Deserialize)]
pub struct StatsRequest {}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub total_jobs: i64,
    pub jobs_by_state: BTreeMap<JobState, i64>,
    pub schedule_count: i64,
    pub db_size_bytes: i64,
    pub uptime_seconds: i64,
}

/// admin.maintenance.v1 - Run manual maintenance
#[derive(Debug, Default, Deserialize)]
pub struct MaintenanceRequest {
    #[serde(default)]
    pub force_vacuum: bool,
    /// Overrides the configured retention window
    #[serde(default)]
    pub retention_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceResponse {
    pub vacuum_run: bool,
    pub jobs_deleted: i64,
    pub db_size_before: i64,
    pub db_size_after: i64,
}
