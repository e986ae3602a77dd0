//! Store-level guarantees against a real SQLite file

mod common;

use common::{file_pool, temp_db};
use courier_core::domain::{Job, JobPayload, JobState, TaskName};
use courier_core::port::time_provider::SystemTimeProvider;
use courier_core::port::{JobStore, SubmitOutcome, TimeProvider};
use courier_infra_sqlite::SqliteJobStore;
use futures::future::join_all;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

fn now() -> i64 {
    SystemTimeProvider.now_millis()
}

#[tokio::test]
async fn test_each_job_leased_by_exactly_one_caller() {
    const JOBS: usize = 5;
    const CALLERS: usize = 16;

    let path = temp_db("lease_exclusive");
    let pool = file_pool(&path).await;
    let store = Arc::new(SqliteJobStore::new(pool.clone(), Arc::new(SystemTimeProvider)));

    for i in 0..JOBS {
        let job = Job::new(
            format!("job-{}", i),
            now(),
            TaskName::new("send_email"),
            JobPayload::default(),
        );
        store.submit(&job).await.unwrap();
    }

    let attempts = (0..CALLERS).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .try_lease(&format!("worker-{}", i), 30_000, None)
                .await
                .unwrap()
        })
    });
    let leased: Vec<Job> = join_all(attempts)
        .await
        .into_iter()
        .filter_map(|r| r.unwrap())
        .collect();

    assert_eq!(leased.len(), JOBS);
    let ids: HashSet<_> = leased.iter().map(|j| j.id.clone()).collect();
    assert_eq!(ids.len(), JOBS, "a job was handed to two workers");

    for job in &leased {
        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Leased);
        assert_eq!(stored.lease_owner, job.lease_owner);
        assert_eq!(stored.attempt_count, 1);
    }
    assert!(store.try_lease("late", 30_000, None).await.unwrap().is_none());

    pool.close().await;
}

#[tokio::test]
async fn test_dedup_key_returns_existing_job() {
    let path = temp_db("dedup");
    let pool = file_pool(&path).await;
    let store = SqliteJobStore::new(pool.clone(), Arc::new(SystemTimeProvider));

    let first = Job::new_test("process_order", now()).with_dedup_key(Some("order-42".into()));
    let second = Job::new_test("process_order", now()).with_dedup_key(Some("order-42".into()));

    assert_eq!(
        store.submit(&first).await.unwrap(),
        SubmitOutcome::Created(first.id.clone())
    );
    assert_eq!(
        store.submit(&second).await.unwrap(),
        SubmitOutcome::Duplicate(first.id.clone())
    );
    assert!(store.get(&second.id).await.unwrap().is_none());

    // Without a key, identical submissions are distinct jobs
    let a = Job::new_test("process_order", now());
    let b = Job::new_test("process_order", now());
    assert!(!store.submit(&a).await.unwrap().is_duplicate());
    assert!(!store.submit(&b).await.unwrap().is_duplicate());
    assert_eq!(store.count_by_state(JobState::Pending).await.unwrap(), 3);

    pool.close().await;
}

#[tokio::test]
async fn test_concurrent_dedup_creates_one_job() {
    let path = temp_db("dedup_race");
    let pool = file_pool(&path).await;
    let store = Arc::new(SqliteJobStore::new(pool.clone(), Arc::new(SystemTimeProvider)));

    let submits = (0..8).map(|_| {
        let store = store.clone();
        tokio::spawn(async move {
            let job = Job::new_test("send_sms", now()).with_dedup_key(Some("sms-1".into()));
            store.submit(&job).await.unwrap()
        })
    });
    let outcomes: Vec<SubmitOutcome> = join_all(submits)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let created = outcomes.iter().filter(|o| !o.is_duplicate()).count();
    assert_eq!(created, 1);
    let ids: HashSet<_> = outcomes.iter().map(|o| o.job_id().clone()).collect();
    assert_eq!(ids.len(), 1);

    pool.close().await;
}

#[tokio::test]
async fn test_jobs_survive_restart() {
    let path = temp_db("restart");

    let (job_id, leased_id) = {
        let pool = file_pool(&path).await;
        let store = SqliteJobStore::new(pool.clone(), Arc::new(SystemTimeProvider));

        let pending = Job::new(
            "job-pending",
            now(),
            TaskName::new("send_email"),
            JobPayload::from_value(json!({"to_email": "a@b.c"})).unwrap(),
        )
        .with_priority(3);
        store.submit(&pending).await.unwrap();
        store.submit(&Job::new_test("send_sms", now())).await.unwrap();

        let leased = store
            .try_lease("worker-old", 30_000, None)
            .await
            .unwrap()
            .unwrap();
        pool.close().await;
        (pending.id, leased.id)
    };

    let pool = file_pool(&path).await;
    let store = SqliteJobStore::new(pool.clone(), Arc::new(SystemTimeProvider));

    // Higher priority job was leased first and is still held
    assert_eq!(leased_id, job_id);
    let job = store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Leased);
    assert_eq!(job.lease_owner.as_deref(), Some("worker-old"));
    assert_eq!(job.priority, 3);
    assert_eq!(job.payload.get("to_email"), Some(&json!("a@b.c")));

    assert_eq!(store.count_by_state(JobState::Pending).await.unwrap(), 1);

    pool.close().await;
}
