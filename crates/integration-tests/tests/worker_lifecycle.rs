//! Worker pool against SQLite: success, retries, dead letters, limits, panics

mod common;

use common::{engine, fast_config, new_job, run_until_terminal, wait_for_state};
use courier_core::application::{shutdown_channel, LeaseSweeper, RetryPolicy, TaskRegistry};
use courier_core::domain::{ErrorKind, JobState};
use courier_core::port::task_handler::mocks::{MockBehavior, MockHandler};
use courier_core::port::time_provider::SystemTimeProvider;
use courier_core::port::{handler_fn, CancelOutcome, JobStore, TaskError};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_always_succeeds() {
    let mut registry = TaskRegistry::new();
    registry
        .register(
            "always_succeeds",
            handler_fn(|_payload, ctx| async move {
                ctx.report_progress(50, Some("halfway".into()));
                Ok(json!({"done": true}))
            }),
        )
        .unwrap();
    let engine = engine(registry, fast_config()).await;

    let job = new_job("always_succeeds");
    engine.store.submit(&job).await.unwrap();

    let finished = run_until_terminal(&engine, &job.id).await;
    assert_eq!(finished.state, JobState::Succeeded);
    assert_eq!(finished.attempt_count, 1);
    assert_eq!(finished.result, Some(json!({"done": true})));
    assert!(finished.lease_owner.is_none());
    assert!(finished.finished_at.is_some());
}

#[tokio::test]
async fn test_always_failing_job_dies_after_max_attempts() {
    let handler = Arc::new(MockHandler::failing(TaskError::transient("smtp down")));
    let mut registry = TaskRegistry::new();
    registry.register_arc("always_fails", handler.clone()).unwrap();
    let engine = engine(registry, fast_config()).await;

    let job = new_job("always_fails").with_max_attempts(3);
    engine.store.submit(&job).await.unwrap();

    let dead = run_until_terminal(&engine, &job.id).await;
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.attempt_count, 3);
    assert_eq!(dead.last_error_kind, Some(ErrorKind::Transient));
    assert_eq!(dead.last_error.as_deref(), Some("smtp down"));
    assert_eq!(handler.call_count(), 3);
}

#[tokio::test]
async fn test_flaky_job_succeeds_on_retry() {
    let handler = Arc::new(MockHandler::new(MockBehavior::FailTimes(2)));
    let mut registry = TaskRegistry::new();
    registry.register_arc("flaky", handler.clone()).unwrap();
    let engine = engine(registry, fast_config()).await;

    let job = new_job("flaky");
    engine.store.submit(&job).await.unwrap();

    let done = run_until_terminal(&engine, &job.id).await;
    assert_eq!(done.state, JobState::Succeeded);
    assert_eq!(done.attempt_count, 3);
    assert_eq!(done.result, Some(json!({"attempt": 3})));
}

#[tokio::test]
async fn test_permanent_error_is_not_retried() {
    let handler = Arc::new(MockHandler::failing(TaskError::permanent("bad address")));
    let mut registry = TaskRegistry::new();
    registry.register_arc("rejects", handler.clone()).unwrap();
    let engine = engine(registry, fast_config()).await;

    let job = new_job("rejects");
    engine.store.submit(&job).await.unwrap();

    let dead = run_until_terminal(&engine, &job.id).await;
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.attempt_count, 1);
    assert_eq!(dead.last_error_kind, Some(ErrorKind::Permanent));
    assert_eq!(handler.call_count(), 1);
}

#[tokio::test]
async fn test_unregistered_task_dies_on_first_lease() {
    let engine = engine(TaskRegistry::new(), fast_config()).await;

    let job = new_job("unregistered_task");
    engine.store.submit(&job).await.unwrap();

    let dead = run_until_terminal(&engine, &job.id).await;
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.attempt_count, 1);
    assert_eq!(dead.last_error_kind, Some(ErrorKind::UnknownTask));
}

#[tokio::test]
async fn test_hard_time_limit_fails_with_timeout_and_retries() {
    let handler = Arc::new(MockHandler::new(MockBehavior::Sleep(Duration::from_secs(30))));
    let mut registry = TaskRegistry::new();
    registry.register_arc("hangs", handler.clone()).unwrap();

    let mut config = fast_config();
    config.soft_time_limit = Duration::from_millis(100);
    config.hard_time_limit = Duration::from_millis(200);
    let engine = engine(registry, config).await;

    let job = new_job("hangs").with_max_attempts(2);
    engine.store.submit(&job).await.unwrap();

    // First attempt: killed, then rescheduled
    assert!(engine.pool.process_next_job("it-0").await.unwrap());
    let after_first = engine.store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(after_first.state, JobState::Scheduled);
    assert_eq!(after_first.last_error_kind, Some(ErrorKind::Timeout));
    assert_eq!(after_first.attempt_count, 1);

    // Second attempt exhausts the budget
    let dead = run_until_terminal(&engine, &job.id).await;
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.attempt_count, 2);
    assert_eq!(dead.last_error_kind, Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn test_renewal_keeps_long_job_away_from_sweeper() {
    let handler = Arc::new(MockHandler::new(MockBehavior::Sleep(Duration::from_millis(600))));
    let mut registry = TaskRegistry::new();
    registry.register_arc("slow", handler.clone()).unwrap();

    let mut config = fast_config();
    config.lease_duration = Duration::from_millis(200);
    config.lease_renew_interval = Duration::from_millis(50);
    config.soft_time_limit = Duration::from_secs(5);
    config.hard_time_limit = Duration::from_secs(10);
    let retry = Arc::new(RetryPolicy::from_config(Arc::new(SystemTimeProvider), &config));
    let engine = engine(registry, config).await;
    let sweeper = LeaseSweeper::new(engine.store.clone(), retry);

    let job = new_job("slow").with_max_attempts(3);
    engine.store.submit(&job).await.unwrap();

    // The body outlives three lease durations while a sweeper runs every 20ms
    let sweeps = AtomicUsize::new(0);
    let reclaimed = AtomicUsize::new(0);
    let sweeping = async {
        loop {
            let report = sweeper.sweep().await.unwrap();
            sweeps.fetch_add(1, Ordering::SeqCst);
            reclaimed.fetch_add(report.requeued + report.buried, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::select! {
        processed = engine.pool.process_next_job("it-0") => assert!(processed.unwrap()),
        _ = sweeping => unreachable!(),
    }

    assert!(sweeps.load(Ordering::SeqCst) >= 10);
    assert_eq!(reclaimed.load(Ordering::SeqCst), 0);

    let finished = engine.store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(finished.state, JobState::Succeeded);
    assert_eq!(finished.attempt_count, 1);
    assert_eq!(handler.call_count(), 1);
}

#[tokio::test]
async fn test_soft_time_limit_signals_cancellation() {
    let handler = Arc::new(MockHandler::new(MockBehavior::SleepCooperative(
        Duration::from_secs(30),
    )));
    let mut registry = TaskRegistry::new();
    registry.register_arc("cooperative", handler.clone()).unwrap();

    let mut config = fast_config();
    config.soft_time_limit = Duration::from_millis(100);
    config.hard_time_limit = Duration::from_secs(5);
    let engine = engine(registry, config).await;

    let job = new_job("cooperative").with_max_attempts(1);
    engine.store.submit(&job).await.unwrap();

    let started = tokio::time::Instant::now();
    let dead = run_until_terminal(&engine, &job.id).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(handler.saw_cancellation());
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.last_error_kind, Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn test_panic_is_contained_to_one_job() {
    let mut registry = TaskRegistry::new();
    registry
        .register("explodes", MockHandler::panicking("boom"))
        .unwrap();
    registry
        .register("always_succeeds", MockHandler::succeeding())
        .unwrap();
    let engine = engine(registry, fast_config()).await;

    let bad = new_job("explodes").with_max_attempts(1);
    let good = new_job("always_succeeds");
    engine.store.submit(&bad).await.unwrap();
    engine.store.submit(&good).await.unwrap();

    let dead = run_until_terminal(&engine, &bad.id).await;
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.last_error_kind, Some(ErrorKind::Panic));
    assert!(dead.last_error.unwrap_or_default().contains("boom"));

    let ok = run_until_terminal(&engine, &good.id).await;
    assert_eq!(ok.state, JobState::Succeeded);
}

#[tokio::test]
async fn test_cancel_before_and_after_lease() {
    let mut registry = TaskRegistry::new();
    registry
        .register(
            "slow",
            MockHandler::new(MockBehavior::Sleep(Duration::from_millis(300))),
        )
        .unwrap();
    let engine = engine(registry, fast_config()).await;

    // Before lease: cancelled and never run
    let queued = new_job("slow");
    engine.store.submit(&queued).await.unwrap();
    assert_eq!(
        engine.store.cancel(&queued.id).await.unwrap(),
        CancelOutcome::Cancelled
    );
    assert!(!engine.pool.process_next_job("it-0").await.unwrap());
    let cancelled = engine.store.get(&queued.id).await.unwrap().unwrap();
    assert_eq!(cancelled.state, JobState::Cancelled);
    assert_eq!(cancelled.attempt_count, 0);

    // After lease: refused, the attempt runs to completion
    let running = new_job("slow");
    engine.store.submit(&running).await.unwrap();
    let (tx, token) = shutdown_channel();
    let store = engine.store.clone();
    let pool = engine.pool;
    let handle = tokio::spawn(async move { pool.run(token).await });

    wait_for_state(store.as_ref(), &running.id, JobState::Running).await;
    assert_eq!(
        store.cancel(&running.id).await.unwrap(),
        CancelOutcome::NotCancellable(JobState::Running)
    );
    let done = wait_for_state(store.as_ref(), &running.id, JobState::Succeeded).await;
    assert_eq!(done.attempt_count, 1);

    tx.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_pool_drains_queue_and_stops_on_shutdown() {
    let handler = Arc::new(MockHandler::succeeding());
    let mut registry = TaskRegistry::new();
    registry.register_arc("always_succeeds", handler.clone()).unwrap();
    let engine = engine(registry, fast_config()).await;

    let jobs: Vec<_> = (0..10)
        .map(|i| new_job("always_succeeds").with_priority(i % 3))
        .collect();
    for job in &jobs {
        engine.store.submit(job).await.unwrap();
    }

    let (tx, token) = shutdown_channel();
    let store = engine.store.clone();
    let pool = engine.pool;
    let handle = tokio::spawn(async move { pool.run(token).await });

    for job in &jobs {
        wait_for_state(store.as_ref(), &job.id, JobState::Succeeded).await;
    }
    assert_eq!(handler.call_count(), 10);

    tx.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("pool did not stop")
        .unwrap()
        .unwrap();
}
