// Maintenance Service
// Scheduled GC of finished jobs and DB vacuum

use crate::application::worker::ShutdownToken;
use crate::error::Result;
use crate::port::{Maintenance, MaintenanceConfig, MaintenanceStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

/// Maintenance scheduler
///
/// Runs periodic maintenance operations (GC, VACUUM) in the background
pub struct MaintenanceScheduler {
    maintenance: Arc<dyn Maintenance>,
    config: MaintenanceConfig,
    interval_hours: u64,
}

impl MaintenanceScheduler {
    /// Create a new maintenance scheduler
    ///
    /// # Arguments
    /// * `maintenance` - Maintenance implementation
    /// * `config` - Maintenance configuration
    /// * `interval_hours` - How often to run maintenance (hours)
    pub fn new(
        maintenance: Arc<dyn Maintenance>,
        config: MaintenanceConfig,
        interval_hours: u64,
    ) -> Self {
        Self {
            maintenance,
            config,
            interval_hours: interval_hours.max(1),
        }
    }

    /// Run maintenance every `interval_hours` until shutdown
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(
            interval_hours = self.interval_hours,
            retention_days = self.config.finished_job_retention_days,
            "Maintenance scheduler started"
        );

        let mut tick = interval(Duration::from_secs(self.interval_hours * 3600));

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.maintenance.run_full_maintenance(&self.config).await {
                        Ok(stats) => {
                            info!(
                                db_size_mb = stats.db_size_mb,
                                job_count = stats.job_count,
                                finished_jobs = stats.finished_job_count,
                                dead_jobs = stats.dead_job_count,
                                "Scheduled maintenance completed successfully"
                            );
                        }
                        Err(e) => {
                            error!(error = ?e, "Scheduled maintenance failed");
                        }
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
        info!("Maintenance scheduler stopped");
    }

    /// Run maintenance immediately (for manual trigger)
    pub async fn run_now(&self) -> Result<MaintenanceStats> {
        info!("Running manual maintenance...");
        let stats = self.maintenance.run_full_maintenance(&self.config).await?;
        info!(
            db_size_mb = stats.db_size_mb,
            job_count = stats.job_count,
            "Manual maintenance completed"
        );
        Ok(stats)
    }
}
