// Engine configuration
//
// Passed into constructors; the daemon builds it from its Settings.

use crate::error::{AppError, Result};
use std::time::Duration;

/// Default number of concurrent worker slots
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default lease duration (30s)
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(30);

/// Default hard time limit per attempt (5 minutes)
pub const DEFAULT_HARD_TIME_LIMIT: Duration = Duration::from_secs(300);

/// Default soft time limit per attempt (4 minutes)
pub const DEFAULT_SOFT_TIME_LIMIT: Duration = Duration::from_secs(240);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker slots
    pub concurrency: usize,
    pub lease_duration: Duration,
    /// How often a running job's lease is renewed (must be < lease_duration)
    pub lease_renew_interval: Duration,

    /// Idle poll backoff starts here...
    pub poll_interval: Duration,
    /// ...and doubles up to here
    pub max_poll_interval: Duration,

    /// Body is asked to stop (cooperative)
    pub soft_time_limit: Duration,
    /// Body is aborted, attempt fails with TIMEOUT
    pub hard_time_limit: Duration,

    pub base_retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Fractional jitter applied to retry delays (0.2 = +/-20%)
    pub retry_jitter: f64,

    /// Lease sweeper period
    pub reclaim_interval: Duration,
    /// Recurring schedule evaluation period
    pub scheduler_tick: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            lease_duration: DEFAULT_LEASE_DURATION,
            lease_renew_interval: DEFAULT_LEASE_DURATION / 3,
            poll_interval: Duration::from_millis(100),
            max_poll_interval: Duration::from_secs(2),
            soft_time_limit: DEFAULT_SOFT_TIME_LIMIT,
            hard_time_limit: DEFAULT_HARD_TIME_LIMIT,
            base_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(600),
            retry_jitter: 0.2,
            reclaim_interval: Duration::from_secs(10),
            scheduler_tick: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    /// Same as default but with the renew interval derived from `lease_duration`
    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self.lease_renew_interval = lease_duration / 3;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(AppError::Config("concurrency must be at least 1".into()));
        }
        if self.lease_duration.is_zero() {
            return Err(AppError::Config("lease_duration must be positive".into()));
        }
        if self.lease_renew_interval.is_zero() || self.lease_renew_interval >= self.lease_duration
        {
            return Err(AppError::Config(format!(
                "lease_renew_interval ({:?}) must be positive and shorter than lease_duration ({:?})",
                self.lease_renew_interval, self.lease_duration
            )));
        }
        if self.poll_interval.is_zero() || self.max_poll_interval < self.poll_interval {
            return Err(AppError::Config(
                "poll_interval must be positive and <= max_poll_interval".into(),
            ));
        }
        if self.soft_time_limit > self.hard_time_limit {
            return Err(AppError::Config(format!(
                "soft_time_limit ({:?}) exceeds hard_time_limit ({:?})",
                self.soft_time_limit, self.hard_time_limit
            )));
        }
        if self.hard_time_limit.is_zero() {
            return Err(AppError::Config("hard_time_limit must be positive".into()));
        }
        if self.max_retry_delay < self.base_retry_delay {
            return Err(AppError::Config(
                "max_retry_delay must be >= base_retry_delay".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.retry_jitter) {
            return Err(AppError::Config(format!(
                "retry_jitter must be in [0, 1), got {}",
                self.retry_jitter
            )));
        }
        if self.reclaim_interval.is_zero() || self.scheduler_tick.is_zero() {
            return Err(AppError::Config(
                "reclaim_interval and scheduler_tick must be positive".into(),
            ));
        }
        Ok(())
    }
}
