// Retry / backoff policy
use crate::application::config::EngineConfig;
use crate::domain::{ErrorKind, Job};
use crate::error::Result;
use crate::port::{JobStore, TimeProvider};
use rand::Rng;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Retry decision result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue as SCHEDULED, eligible again at `not_before`
    Retry { delay_ms: i64, not_before: i64 },
    /// Terminal
    Dead,
}

/// Decides whether and when a failed job runs again.
///
/// `delay = min(base * 2^(attempt - 1), max)`, then jittered by +/-`jitter`.
pub struct RetryPolicy {
    time_provider: Arc<dyn TimeProvider>,
    base_delay_ms: i64,
    max_delay_ms: i64,
    jitter: f64,
}

impl RetryPolicy {
    /// Create a policy with no jitter
    ///
    /// # Arguments
    /// * `time_provider` - Time provider for current time
    /// * `base_delay_ms` - Delay before the second attempt
    /// * `max_delay_ms` - Cap on any single delay
    pub fn new(time_provider: Arc<dyn TimeProvider>, base_delay_ms: i64, max_delay_ms: i64) -> Self {
        Self {
            time_provider,
            base_delay_ms: base_delay_ms.max(0),
            max_delay_ms: max_delay_ms.max(base_delay_ms.max(0)),
            jitter: 0.0,
        }
    }

    pub fn from_config(time_provider: Arc<dyn TimeProvider>, config: &EngineConfig) -> Self {
        Self::new(
            time_provider,
            duration_millis(config.base_retry_delay),
            duration_millis(config.max_retry_delay),
        )
        .with_jitter(config.retry_jitter)
    }

    /// Fractional jitter, clamped to [0, 1)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 0.99);
        self
    }

    /// Unjittered delay after the given (1-based) attempt failed
    pub fn backoff_delay(&self, attempt: i32) -> i64 {
        let exponent = attempt.saturating_sub(1).clamp(0, 62) as u32;
        self.base_delay_ms
            .saturating_mul(1_i64 << exponent)
            .min(self.max_delay_ms)
    }

    fn jittered(&self, delay_ms: i64) -> i64 {
        if self.jitter <= 0.0 || delay_ms == 0 {
            return delay_ms;
        }
        let factor = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        ((delay_ms as f64) * (1.0 + factor)).round().max(0.0) as i64
    }

    /// Decide what happens to a job whose current attempt failed with `kind`
    pub fn decide(&self, job: &Job, kind: ErrorKind) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::Dead;
        }
        if job.attempts_exhausted() {
            warn!(
                job_id = %job.id,
                attempts = job.attempt_count,
                max_attempts = job.max_attempts,
                "Max retry attempts reached"
            );
            return RetryDecision::Dead;
        }
        let delay_ms = self.jittered(self.backoff_delay(job.attempt_count));
        RetryDecision::Retry {
            delay_ms,
            not_before: self.time_provider.now_millis() + delay_ms,
        }
    }

    /// Decide and persist: FAILED -> SCHEDULED or FAILED -> DEAD.
    ///
    /// `job` must already be FAILED in the store.
    pub async fn resolve(
        &self,
        store: &dyn JobStore,
        job: &Job,
        kind: ErrorKind,
    ) -> Result<RetryDecision> {
        let decision = self.decide(job, kind);
        match decision {
            RetryDecision::Retry {
                delay_ms,
                not_before,
            } => {
                if store.schedule_retry(&job.id, not_before).await? {
                    info!(
                        job_id = %job.id,
                        attempt = job.attempt_count,
                        max_attempts = job.max_attempts,
                        delay_ms = delay_ms,
                        error_kind = %kind,
                        "Scheduling retry"
                    );
                }
            }
            RetryDecision::Dead => {
                if store.mark_dead(&job.id).await? {
                    error!(
                        job_id = %job.id,
                        task_name = %job.task_name,
                        attempt = job.attempt_count,
                        error_kind = %kind,
                        last_error = ?job.last_error,
                        "Job is dead"
                    );
                }
            }
        }
        Ok(decision)
    }
}

pub(crate) fn duration_millis(d: std::time::Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
