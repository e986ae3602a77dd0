// Worker Pool - bounded execution slots that lease, run and report

pub mod constants;
mod execution;
mod panic_guard;
mod shutdown;

use constants::*;
pub use execution::AttemptOutcome;
pub use panic_guard::panic_message;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::config::EngineConfig;
use crate::application::registry::TaskRegistry;
use crate::application::retry::{duration_millis, RetryPolicy};
use crate::domain::{ErrorKind, JobFailure};
use crate::error::Result;
use crate::port::JobStore;
use execution::{run_attempt, AttemptLimits};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Worker pool: `concurrency` independent slots sharing nothing but the store
#[derive(Clone)]
pub struct WorkerPool {
    job_store: Arc<dyn JobStore>,
    registry: Arc<TaskRegistry>,
    retry_policy: Arc<RetryPolicy>,
    config: EngineConfig,
    worker_prefix: String,
}

impl WorkerPool {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        registry: Arc<TaskRegistry>,
        retry_policy: Arc<RetryPolicy>,
        config: EngineConfig,
    ) -> Self {
        Self {
            job_store,
            registry,
            retry_policy,
            config,
            worker_prefix: format!("{}-{}", WORKER_ID_PREFIX, std::process::id()),
        }
    }

    /// Override the worker id prefix (several pools on one host)
    pub fn with_worker_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_prefix = prefix.into();
        self
    }

    pub fn worker_id(&self, slot: usize) -> String {
        format!("{}-{}", self.worker_prefix, slot)
    }

    /// Run all slots until shutdown. In-flight jobs are finished before a slot exits.
    pub async fn run(&self, shutdown: ShutdownToken) -> Result<()> {
        info!(
            concurrency = self.config.concurrency,
            tasks = ?self.registry.names(),
            "Worker pool started"
        );

        let mut slots = JoinSet::new();
        for slot in 0..self.config.concurrency {
            let pool = self.clone();
            let token = shutdown.clone();
            slots.spawn(async move { pool.run_slot(slot, token).await });
        }

        while let Some(joined) = slots.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker slot terminated abnormally");
            }
        }

        info!("Worker pool stopped");
        Ok(())
    }

    async fn run_slot(&self, slot: usize, mut shutdown: ShutdownToken) {
        let worker_id = self.worker_id(slot);
        let mut idle = IdleBackoff::new(self.config.poll_interval, self.config.max_poll_interval);
        debug!(worker_id = %worker_id, "Worker slot started");

        loop {
            if shutdown.is_shutdown() {
                break;
            }
            let pause = match self.process_next_job(&worker_id).await {
                Ok(true) => {
                    idle.reset();
                    continue;
                }
                Ok(false) => idle.next_delay(),
                Err(e) => {
                    error!(worker_id = %worker_id, error = %e, "Worker error");
                    ERROR_RECOVERY_SLEEP_DURATION
                }
            };
            tokio::select! {
                _ = sleep(pause) => {},
                _ = shutdown.wait() => break,
            }
        }
        debug!(worker_id = %worker_id, "Worker slot stopped");
    }

    /// Lease and run at most one job (returns true if a job was leased)
    pub async fn process_next_job(&self, worker_id: &str) -> Result<bool> {
        let lease_ms = duration_millis(self.config.lease_duration);
        let Some(mut job) = self.job_store.try_lease(worker_id, lease_ms, None).await? else {
            return Ok(false);
        };

        info!(
            job_id = %job.id,
            task_name = %job.task_name,
            attempt = job.attempt_count,
            max_attempts = job.max_attempts,
            worker_id = %worker_id,
            "Job leased"
        );

        if !self.job_store.mark_running(&job.id, worker_id).await? {
            warn!(job_id = %job.id, "Lease lost before start");
            return Ok(true);
        }

        let outcome = match self.registry.get(job.task_name.as_str()) {
            Some(handler) => {
                let limits = AttemptLimits {
                    lease_duration: self.config.lease_duration,
                    renew_interval: self.config.lease_renew_interval,
                    soft_time_limit: self.config.soft_time_limit,
                    hard_time_limit: self.config.hard_time_limit,
                };
                run_attempt(self.job_store.as_ref(), worker_id, &job, handler, &limits).await?
            }
            None => AttemptOutcome::Failed(JobFailure::unknown_task(job.task_name.as_str())),
        };

        match outcome {
            AttemptOutcome::Succeeded(result) => {
                if self.job_store.complete(&job.id, worker_id, &result).await? {
                    info!(job_id = %job.id, attempt = job.attempt_count, "Job succeeded");
                } else {
                    warn!(job_id = %job.id, "Lease lost before completion, result discarded");
                }
            }
            AttemptOutcome::Failed(failure) => {
                if !self.job_store.fail(&job.id, worker_id, &failure).await? {
                    warn!(job_id = %job.id, "Lease lost before failure was recorded");
                    return Ok(true);
                }
                match failure.kind {
                    ErrorKind::UnknownTask | ErrorKind::Permanent => {
                        warn!(job_id = %job.id, error = %failure, "Job failed (not retryable)")
                    }
                    _ => warn!(job_id = %job.id, attempt = job.attempt_count, error = %failure, "Job attempt failed"),
                }
                job.last_error = Some(failure.message.clone());
                job.last_error_kind = Some(failure.kind);
                self.retry_policy
                    .resolve(self.job_store.as_ref(), &job, failure.kind)
                    .await?;
            }
            AttemptOutcome::LeaseLost => {}
        }
        Ok(true)
    }
}

/// Idle poll delay: starts at `min`, doubles up to `max`, jittered
struct IdleBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl IdleBackoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    fn reset(&mut self) {
        self.current = self.min;
    }

    fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        let factor = rand::thread_rng().gen_range(1.0 - IDLE_POLL_JITTER..=1.0 + IDLE_POLL_JITTER);
        base.mul_f64(factor)
    }
}
