// Lease recovery: expired leases and stranded failures
use crate::application::retry::RetryPolicy;
use crate::application::worker::ShutdownToken;
use crate::domain::ErrorKind;
use crate::error::Result;
use crate::port::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// What one sweep did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Returned to PENDING
    pub requeued: usize,
    /// Reclaimed with no attempts left
    pub buried: usize,
    /// FAILED jobs whose retry decision was lost and has now been applied
    pub stranded_resolved: usize,
}

/// Lease sweeper
///
/// Runs once at startup (crash recovery) and then every `reclaim_interval`:
/// 1. Jobs in LEASED/RUNNING whose lease expired go back to PENDING
///    (or DEAD with LEASE_EXPIRED once `max_attempts` is used up)
/// 2. FAILED jobs left behind by a worker that died between `fail` and the
///    retry decision are passed through the retry policy
pub struct LeaseSweeper {
    job_store: Arc<dyn JobStore>,
    retry_policy: Arc<RetryPolicy>,
}

impl LeaseSweeper {
    pub fn new(job_store: Arc<dyn JobStore>, retry_policy: Arc<RetryPolicy>) -> Self {
        Self {
            job_store,
            retry_policy,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for job in self.job_store.reclaim_expired().await? {
            if job.state.is_terminal() {
                report.buried += 1;
                error!(
                    job_id = %job.id,
                    task_name = %job.task_name,
                    attempt = job.attempt_count,
                    "Lease expired with no attempts left, job is dead"
                );
            } else {
                report.requeued += 1;
                warn!(
                    job_id = %job.id,
                    task_name = %job.task_name,
                    attempt = job.attempt_count,
                    "Expired lease reclaimed"
                );
            }
        }

        for job in self.job_store.find_stranded_failures().await? {
            let kind = job.last_error_kind.unwrap_or(ErrorKind::Transient);
            self.retry_policy
                .resolve(self.job_store.as_ref(), &job, kind)
                .await?;
            report.stranded_resolved += 1;
        }

        if report != SweepReport::default() {
            info!(
                requeued = report.requeued,
                buried = report.buried,
                stranded_resolved = report.stranded_resolved,
                "Lease sweep complete"
            );
        }
        Ok(report)
    }

    /// Sweep every `period` until shutdown
    pub async fn run(&self, period: Duration, mut shutdown: ShutdownToken) {
        info!(period_ms = period.as_millis() as u64, "Lease sweeper started");
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Lease sweep failed");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
        info!("Lease sweeper stopped");
    }
}
