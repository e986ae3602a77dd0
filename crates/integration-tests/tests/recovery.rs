//! Crash recovery: expired leases and lost retry decisions

mod common;

use common::memory_pool;
use courier_core::application::{LeaseSweeper, RetryPolicy, SweepReport};
use courier_core::domain::{ErrorKind, Job, JobFailure, JobState};
use courier_core::port::time_provider::mocks::ManualTimeProvider;
use courier_core::port::{JobStore, TimeProvider};
use courier_infra_sqlite::SqliteJobStore;
use serde_json::json;
use std::sync::Arc;

// 2026-03-02T10:00:00Z
const T0: i64 = 1_772_445_600_000;
const LEASE_MS: i64 = 30_000;

struct Fixture {
    time: Arc<ManualTimeProvider>,
    store: Arc<SqliteJobStore>,
    sweeper: LeaseSweeper,
}

async fn fixture() -> Fixture {
    let time = Arc::new(ManualTimeProvider::new(T0));
    let time_dyn: Arc<dyn TimeProvider> = time.clone();
    let store = Arc::new(SqliteJobStore::new(memory_pool().await, time_dyn.clone()));
    let retry = Arc::new(RetryPolicy::new(time_dyn, 1_000, 60_000));
    let sweeper = LeaseSweeper::new(store.clone(), retry);
    Fixture {
        time,
        store,
        sweeper,
    }
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed_by_another_worker() {
    let f = fixture().await;
    let job = Job::new_test("process_order", T0);
    f.store.submit(&job).await.unwrap();

    let leased = f.store.try_lease("worker-a", LEASE_MS, None).await.unwrap().unwrap();
    assert!(f.store.mark_running(&leased.id, "worker-a").await.unwrap());

    // Still held: nothing to reclaim, nothing to lease
    f.time.advance(LEASE_MS - 1);
    assert_eq!(f.sweeper.sweep().await.unwrap(), SweepReport::default());
    assert!(f.store.try_lease("worker-b", LEASE_MS, None).await.unwrap().is_none());

    // worker-a goes silent past expiry
    f.time.advance(2);
    let report = f.sweeper.sweep().await.unwrap();
    assert_eq!(report.requeued, 1);

    let retaken = f.store.try_lease("worker-b", LEASE_MS, None).await.unwrap().unwrap();
    assert_eq!(retaken.id, job.id);
    assert_eq!(retaken.lease_owner.as_deref(), Some("worker-b"));
    assert_eq!(retaken.attempt_count, 2);

    // The stale owner can no longer touch the job
    assert!(!f.store.renew_lease(&job.id, "worker-a", LEASE_MS).await.unwrap());
    assert!(!f.store.complete(&job.id, "worker-a", &json!({})).await.unwrap());

    assert!(f.store.mark_running(&job.id, "worker-b").await.unwrap());
    assert!(f.store.complete(&job.id, "worker-b", &json!({"ok": 1})).await.unwrap());
    let done = f.store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(done.state, JobState::Succeeded);
    assert_eq!(done.result, Some(json!({"ok": 1})));
}

#[tokio::test]
async fn test_renewed_lease_is_not_reclaimed() {
    let f = fixture().await;
    let job = Job::new_test("generate_daily_report", T0);
    f.store.submit(&job).await.unwrap();
    f.store.try_lease("worker-a", LEASE_MS, None).await.unwrap().unwrap();
    f.store.mark_running(&job.id, "worker-a").await.unwrap();

    f.time.advance(20_000);
    assert!(f.store.renew_lease(&job.id, "worker-a", LEASE_MS).await.unwrap());
    f.time.advance(20_000);

    assert_eq!(f.sweeper.sweep().await.unwrap(), SweepReport::default());
    let job = f.store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Running);
    assert_eq!(job.lease_expires_at, Some(T0 + 20_000 + LEASE_MS));
}

#[tokio::test]
async fn test_expired_lease_on_last_attempt_buries_job() {
    let f = fixture().await;
    let job = Job::new_test("assign_driver", T0).with_max_attempts(1);
    f.store.submit(&job).await.unwrap();
    f.store.try_lease("worker-a", LEASE_MS, None).await.unwrap().unwrap();

    f.time.advance(LEASE_MS + 1);
    let report = f.sweeper.sweep().await.unwrap();
    assert_eq!(report.buried, 1);
    assert_eq!(report.requeued, 0);

    let dead = f.store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.last_error_kind, Some(ErrorKind::LeaseExpired));
    assert!(dead.lease_owner.is_none());
    assert!(dead.finished_at.is_some());
}

#[tokio::test]
async fn test_stranded_failure_gets_retry_decision() {
    let f = fixture().await;
    let retryable = Job::new_test("send_sms", T0);
    let permanent = Job::new_test("send_sms", T0);
    f.store.submit(&retryable).await.unwrap();
    f.store.submit(&permanent).await.unwrap();

    // Workers died right after recording the failure
    for (job, kind) in [
        (&retryable, ErrorKind::Transient),
        (&permanent, ErrorKind::Permanent),
    ] {
        let leased = f.store.try_lease("worker-a", LEASE_MS, None).await.unwrap().unwrap();
        assert_eq!(leased.id, job.id);
        f.store.mark_running(&job.id, "worker-a").await.unwrap();
        assert!(f
            .store
            .fail(&job.id, "worker-a", &JobFailure::new(kind, "gateway error"))
            .await
            .unwrap());
    }

    // Left alone while the dead worker's lease could still be live
    assert_eq!(f.sweeper.sweep().await.unwrap().stranded_resolved, 0);

    let now = f.time.advance(LEASE_MS + 1);
    let report = f.sweeper.sweep().await.unwrap();
    assert_eq!(report.stranded_resolved, 2);
    assert_eq!(report.requeued, 0);

    let scheduled = f.store.get(&retryable.id).await.unwrap().unwrap();
    assert_eq!(scheduled.state, JobState::Scheduled);
    assert_eq!(scheduled.not_before, now + 1_000);

    let dead = f.store.get(&permanent.id).await.unwrap().unwrap();
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.last_error.as_deref(), Some("gateway error"));
}
