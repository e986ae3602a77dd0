//! RPC Method Handlers
//!
//! Thin adapters: parse params, call the Dispatcher or Maintenance port, map errors.

use crate::error::to_rpc_error;
use crate::types::{
    CancelResponse, JobIdRequest, JobStatus, ListSchedulesRequest, ListSchedulesResponse,
    MaintenanceRequest, MaintenanceResponse, RegisterScheduleRequest, RegisterScheduleResponse,
    ScheduleNameRequest, StatsRequest, StatsResponse, SubmitReceipt, SubmitRequest,
    UnregisterScheduleResponse,
};
use courier_core::application::Dispatcher;
use courier_core::error::AppError;
use courier_core::port::{CancelOutcome, Maintenance, MaintenanceConfig};
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    dispatcher: Arc<Dispatcher>,
    maintenance: Arc<dyn Maintenance>,
    maintenance_config: MaintenanceConfig,
    start_time: Instant,
}

impl RpcHandler {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        maintenance: Arc<dyn Maintenance>,
        maintenance_config: MaintenanceConfig,
    ) -> Self {
        Self {
            dispatcher,
            maintenance,
            maintenance_config,
            start_time: Instant::now(),
        }
    }

    /// jobs.submit.v1
    pub async fn submit(&self, params: SubmitRequest) -> Result<SubmitReceipt, ErrorObjectOwned> {
        self.dispatcher.submit(params).await.map_err(to_rpc_error)
    }

    /// jobs.status.v1
    pub async fn status(&self, params: JobIdRequest) -> Result<JobStatus, ErrorObjectOwned> {
        self.dispatcher
            .get_status(&params.job_id)
            .await
            .map_err(to_rpc_error)
    }

    /// jobs.cancel.v1
    pub async fn cancel(&self, params: JobIdRequest) -> Result<CancelResponse, ErrorObjectOwned> {
        match self
            .dispatcher
            .cancel(&params.job_id)
            .await
            .map_err(to_rpc_error)?
        {
            CancelOutcome::Cancelled => Ok(CancelResponse {
                job_id: params.job_id,
                cancelled: true,
                state: None,
            }),
            CancelOutcome::NotCancellable(state) => Ok(CancelResponse {
                job_id: params.job_id,
                cancelled: false,
                state: Some(state),
            }),
            CancelOutcome::NotFound => Err(to_rpc_error(AppError::NotFound(format!(
                "job {}",
                params.job_id
            )))),
        }
    }

    /// schedules.register.v1
    pub async fn register_schedule(
        &self,
        params: RegisterScheduleRequest,
    ) -> Result<RegisterScheduleResponse, ErrorObjectOwned> {
        let name = params.name.clone();
        let schedule_id = self
            .dispatcher
            .register_recurring_schedule(params)
            .await
            .map_err(to_rpc_error)?;
        Ok(RegisterScheduleResponse { schedule_id, name })
    }

    /// schedules.unregister.v1
    pub async fn unregister_schedule(
        &self,
        params: ScheduleNameRequest,
    ) -> Result<UnregisterScheduleResponse, ErrorObjectOwned> {
        let removed = self
            .dispatcher
            .unregister_schedule(&params.name)
            .await
            .map_err(to_rpc_error)?;
        Ok(UnregisterScheduleResponse {
            name: params.name,
            removed,
        })
    }

    /// schedules.list.v1
    pub async fn list_schedules(
        &self,
        _params: ListSchedulesRequest,
    ) -> Result<ListSchedulesResponse, ErrorObjectOwned> {
        let schedules = self
            .dispatcher
            .list_schedules()
            .await
            .map_err(to_rpc_error)?;
        Ok(ListSchedulesResponse { schedules })
    }

    /// admin.stats.v1
    pub async fn stats(&self, _params: StatsRequest) -> Result<StatsResponse, ErrorObjectOwned> {
        let jobs_by_state = self.dispatcher.job_counts().await.map_err(to_rpc_error)?;
        let stats = self.maintenance.get_stats().await.map_err(to_rpc_error)?;

        Ok(StatsResponse {
            total_jobs: stats.job_count,
            jobs_by_state,
            schedule_count: stats.schedule_count,
            db_size_bytes: stats.db_size_bytes,
            uptime_seconds: self.start_time.elapsed().as_secs() as i64,
        })
    }

    /// admin.maintenance.v1
    pub async fn maintenance(
        &self,
        params: MaintenanceRequest,
    ) -> Result<MaintenanceResponse, ErrorObjectOwned> {
        let retention_days = params
            .retention_days
            .unwrap_or(self.maintenance_config.finished_job_retention_days);
        if retention_days < 0 {
            return Err(to_rpc_error(AppError::Validation(
                "retention_days must be >= 0".to_string(),
            )));
        }

        let stats_before = self.maintenance.get_stats().await.map_err(to_rpc_error)?;

        let jobs_deleted = self
            .maintenance
            .gc_finished_jobs(retention_days)
            .await
            .map_err(to_rpc_error)?;

        let vacuum_run =
            params.force_vacuum || stats_before.db_size_mb > self.maintenance_config.max_db_size_mb;
        if vacuum_run {
            self.maintenance.vacuum().await.map_err(to_rpc_error)?;
        }

        let stats_after = self.maintenance.get_stats().await.map_err(to_rpc_error)?;

        info!(
            jobs_deleted = jobs_deleted,
            vacuum_run = vacuum_run,
            "Manual maintenance completed"
        );

        Ok(MaintenanceResponse {
            vacuum_run,
            jobs_deleted,
            db_size_before: stats_before.db_size_bytes,
            db_size_after: stats_after.db_size_bytes,
        })
    }
}
