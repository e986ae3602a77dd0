// One supervised attempt: body in its own task, lease renewal, soft/hard limits

use super::panic_guard::panic_message;
use crate::application::retry::duration_millis;
use crate::domain::{ErrorKind, Job, JobFailure};
use crate::error::Result;
use crate::port::{JobStore, TaskContext, TaskControl, TaskHandler, TaskOutput};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// How an attempt ended
#[derive(Debug)]
pub enum AttemptOutcome {
    Succeeded(TaskOutput),
    Failed(JobFailure),
    /// Renewal was refused: another worker may own the job now. Nothing may be written.
    LeaseLost,
}

pub(crate) struct AttemptLimits {
    pub lease_duration: Duration,
    pub renew_interval: Duration,
    pub soft_time_limit: Duration,
    pub hard_time_limit: Duration,
}

pub(crate) async fn run_attempt(
    store: &dyn JobStore,
    worker_id: &str,
    job: &Job,
    handler: Arc<dyn TaskHandler>,
    limits: &AttemptLimits,
) -> Result<AttemptOutcome> {
    let (ctx, control) = TaskContext::new(job.id.clone(), job.attempt_count);
    let payload = job.payload.clone();
    let mut body = tokio::spawn(async move { handler.run(payload, ctx).await });

    let lease_ms = duration_millis(limits.lease_duration);
    let soft = sleep(limits.soft_time_limit);
    let hard = sleep(limits.hard_time_limit);
    tokio::pin!(soft, hard);

    let mut renew = interval_at(Instant::now() + limits.renew_interval, limits.renew_interval);
    renew.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut soft_limit_hit = false;

    loop {
        tokio::select! {
            joined = &mut body => {
                flush_progress(store, worker_id, job, &control).await;
                return Ok(outcome_of(joined, soft_limit_hit, limits));
            }
            _ = &mut soft, if !soft_limit_hit => {
                soft_limit_hit = true;
                warn!(
                    job_id = %job.id,
                    limit_ms = duration_millis(limits.soft_time_limit),
                    "Soft time limit reached, requesting cancellation"
                );
                control.cancel();
            }
            _ = &mut hard => {
                control.cancel();
                // Abort only lands at an await point; a body blocking its thread keeps running
                body.abort();
                warn!(
                    job_id = %job.id,
                    limit_ms = duration_millis(limits.hard_time_limit),
                    "Hard time limit reached, task aborted"
                );
                return Ok(AttemptOutcome::Failed(JobFailure::timeout(duration_millis(
                    limits.hard_time_limit,
                ))));
            }
            _ = renew.tick() => {
                match store.renew_lease(&job.id, worker_id, lease_ms).await {
                    Ok(true) => {
                        debug!(job_id = %job.id, "Lease renewed");
                        flush_progress(store, worker_id, job, &control).await;
                    }
                    Ok(false) => {
                        control.cancel();
                        body.abort();
                        warn!(job_id = %job.id, worker_id = %worker_id, "Lease lost, abandoning attempt");
                        return Ok(AttemptOutcome::LeaseLost);
                    }
                    Err(e) => {
                        // Keep running; if the lease lapses the next renewal reports it
                        warn!(job_id = %job.id, error = %e, "Lease renewal failed");
                    }
                }
            }
        }
    }
}

fn outcome_of(
    joined: std::result::Result<std::result::Result<TaskOutput, crate::port::TaskError>, JoinError>,
    soft_limit_hit: bool,
    limits: &AttemptLimits,
) -> AttemptOutcome {
    match joined {
        Ok(Ok(value)) => AttemptOutcome::Succeeded(value),
        Ok(Err(err)) if soft_limit_hit => AttemptOutcome::Failed(JobFailure::new(
            ErrorKind::Timeout,
            format!(
                "Soft time limit of {}ms exceeded: {}",
                duration_millis(limits.soft_time_limit),
                err.message
            ),
        )),
        Ok(Err(err)) => AttemptOutcome::Failed(err.into()),
        Err(join_err) if join_err.is_panic() => AttemptOutcome::Failed(JobFailure::new(
            ErrorKind::Panic,
            format!("Task panicked: {}", panic_message(join_err.into_panic())),
        )),
        Err(join_err) => AttemptOutcome::Failed(JobFailure::new(
            ErrorKind::Transient,
            format!("Task aborted: {}", join_err),
        )),
    }
}

async fn flush_progress(store: &dyn JobStore, worker_id: &str, job: &Job, control: &TaskControl) {
    if let Some(progress) = control.take_progress() {
        if let Err(e) = store.record_progress(&job.id, worker_id, &progress).await {
            warn!(job_id = %job.id, error = %e, "Failed to persist progress");
        }
    }
}
