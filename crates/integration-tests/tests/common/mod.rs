//! Shared fixtures for the end-to-end tests
#![allow(dead_code)]

use courier_core::application::{EngineConfig, RetryPolicy, TaskRegistry, WorkerPool};
use courier_core::domain::{Job, JobState};
use courier_core::port::time_provider::SystemTimeProvider;
use courier_core::port::{JobStore, TimeProvider};
use courier_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub async fn memory_pool() -> SqlitePool {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

/// Fresh database file under the temp dir (WAL side files removed too)
pub fn temp_db(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("courier_{}_{}.db", name, std::process::id()));
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
    }
    path
}

pub async fn file_pool(path: &PathBuf) -> SqlitePool {
    let pool = create_pool(&format!("sqlite://{}", path.display()))
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

/// Short limits so lifecycle tests finish in milliseconds
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        concurrency: 2,
        lease_duration: Duration::from_secs(5),
        lease_renew_interval: Duration::from_millis(50),
        poll_interval: Duration::from_millis(5),
        max_poll_interval: Duration::from_millis(20),
        soft_time_limit: Duration::from_secs(2),
        hard_time_limit: Duration::from_secs(3),
        base_retry_delay: Duration::from_millis(10),
        max_retry_delay: Duration::from_millis(50),
        retry_jitter: 0.0,
        ..Default::default()
    }
}

pub struct Engine {
    pub store: Arc<SqliteJobStore>,
    pub pool: WorkerPool,
}

pub async fn engine(registry: TaskRegistry, config: EngineConfig) -> Engine {
    let db = memory_pool().await;
    let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = Arc::new(SqliteJobStore::new(db, time.clone()));
    let retry = Arc::new(RetryPolicy::from_config(time, &config));
    let pool = WorkerPool::new(store.clone(), Arc::new(registry), retry, config)
        .with_worker_prefix("it");
    Engine { store, pool }
}

pub fn new_job(task_name: &str) -> Job {
    Job::new_test(task_name, SystemTimeProvider.now_millis())
}

/// Drive one slot until the job reaches a terminal state
pub async fn run_until_terminal(engine: &Engine, job_id: &str) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = engine.store.get(job_id).await.unwrap().unwrap();
        if job.state.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} stuck in {}",
            job_id,
            job.state
        );
        if !engine.pool.process_next_job("it-0").await.unwrap() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub async fn wait_for_state(store: &dyn JobStore, job_id: &str, state: JobState) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = store.get(job_id).await.unwrap().unwrap();
        if job.state == state {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} never reached {} (now {})",
            job_id,
            state,
            job.state
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
