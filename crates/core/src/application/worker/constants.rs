// Worker constants (no magic values)
use std::time::Duration;

/// Sleep duration after a worker error (store unavailable) before retrying (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Idle poll jitter (+/-20%) so idle slots do not poll in lockstep
pub const IDLE_POLL_JITTER: f64 = 0.2;

/// Prefix for generated worker ids (`worker-<pid>-<slot>`)
pub const WORKER_ID_PREFIX: &str = "worker";
