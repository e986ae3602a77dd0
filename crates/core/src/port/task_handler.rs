// Task Handler Port
// Task bodies are plugged in by the embedding application (email transport, SMS
// gateway, report generation, ...). The engine only sees this trait.

use crate::domain::{ErrorKind, JobFailure, JobId, JobPayload, Progress};
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;

/// Value a task body hands back on success (stored as the job result)
pub type TaskOutput = serde_json::Value;

/// Error returned by a task body
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Retryable failure (network blip, upstream 5xx)
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// Non-retryable failure (bad input, business rule)
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }
}

impl From<TaskError> for JobFailure {
    fn from(err: TaskError) -> Self {
        JobFailure::new(err.kind, err.message)
    }
}

/// Per-attempt handle given to a task body
#[derive(Clone)]
pub struct TaskContext {
    job_id: JobId,
    attempt: i32,
    cancel_rx: watch::Receiver<bool>,
    progress: Arc<Mutex<Option<Progress>>>,
}

/// Worker-side half of a `TaskContext`
pub struct TaskControl {
    cancel_tx: watch::Sender<bool>,
    progress: Arc<Mutex<Option<Progress>>>,
}

impl TaskContext {
    pub fn new(job_id: impl Into<JobId>, attempt: i32) -> (Self, TaskControl) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let progress = Arc::new(Mutex::new(None));
        (
            Self {
                job_id: job_id.into(),
                attempt,
                cancel_rx,
                progress: Arc::clone(&progress),
            },
            TaskControl {
                cancel_tx,
                progress,
            },
        )
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// 1-based attempt number
    pub fn attempt(&self) -> i32 {
        self.attempt
    }

    /// True once the soft time limit passed or the lease was lost
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolves when cancellation is requested (or the worker side is gone)
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Record progress; the worker persists the latest report on its next lease renewal
    pub fn report_progress(&self, percent: u8, message: Option<String>) {
        let mut slot = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Progress {
            percent: percent.min(100),
            message,
        });
    }
}

impl TaskControl {
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Latest unpersisted progress report
    pub fn take_progress(&self) -> Option<Progress> {
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

/// A task body
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, payload: JobPayload, ctx: TaskContext) -> Result<TaskOutput, TaskError>;
}

/// Adapter that turns an async closure into a `TaskHandler`
pub struct FnHandler<F>(F);

/// ```ignore
/// registry.register("send_email", handler_fn(|payload, _ctx| async move {
///     Ok(serde_json::json!({ "to": payload.get("to") }))
/// }))?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(JobPayload, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutput, TaskError>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(JobPayload, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutput, TaskError>> + Send,
{
    async fn run(&self, payload: JobPayload, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        (self.0)(payload, ctx).await
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Mock handler behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed with this value
        Succeed(TaskOutput),
        /// Always fail
        Fail(TaskError),
        /// Fail transiently for the first N calls, then succeed
        FailTimes(usize),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep, ignoring cancellation
        Sleep(Duration),
        /// Sleep, but return a transient error as soon as cancellation is requested
        SleepCooperative(Duration),
    }

    /// Mock task handler for testing
    pub struct MockHandler {
        behavior: MockBehavior,
        call_count: AtomicUsize,
        saw_cancellation: Arc<Mutex<bool>>,
    }

    impl MockHandler {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                call_count: AtomicUsize::new(0),
                saw_cancellation: Arc::new(Mutex::new(false)),
            }
        }

        pub fn succeeding() -> Self {
            Self::new(MockBehavior::Succeed(serde_json::json!({ "ok": true })))
        }

        pub fn failing(err: TaskError) -> Self {
            Self::new(MockBehavior::Fail(err))
        }

        pub fn panicking(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Whether a cooperative sleeper observed cancellation
        pub fn saw_cancellation(&self) -> bool {
            *self.saw_cancellation.lock().unwrap()
        }
    }

    #[async_trait]
    impl TaskHandler for MockHandler {
        async fn run(
            &self,
            _payload: JobPayload,
            ctx: TaskContext,
        ) -> Result<TaskOutput, TaskError> {
            let call = self.call_count.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                MockBehavior::Succeed(value) => Ok(value.clone()),
                MockBehavior::Fail(err) => Err(err.clone()),
                MockBehavior::FailTimes(n) if call < *n => {
                    Err(TaskError::transient(format!("planned failure {}", call + 1)))
                }
                MockBehavior::FailTimes(_) => Ok(serde_json::json!({ "attempt": ctx.attempt() })),
                MockBehavior::Panic(msg) => panic!("{}", msg),
                MockBehavior::Sleep(duration) => {
                    tokio::time::sleep(*duration).await;
                    Ok(TaskOutput::Null)
                }
                MockBehavior::SleepCooperative(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(*duration) => Ok(TaskOutput::Null),
                        _ = ctx.cancelled() => {
                            *self.saw_cancellation.lock().unwrap() = true;
                            Err(TaskError::transient("stopped on cancellation"))
                        }
                    }
                }
            }
        }
    }
}
