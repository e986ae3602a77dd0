//! Courier Job Engine - Main Entry Point
//!
//! Composition root: wires the SQLite stores into the worker pool, scheduler,
//! lease sweeper, maintenance scheduler and JSON-RPC server.

mod settings;
mod tasks;
mod telemetry;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use courier_api_rpc::{RpcServer, RpcServerConfig};
use courier_core::application::{
    shutdown_channel, Dispatcher, LeaseSweeper, MaintenanceScheduler, RetryPolicy, Scheduler,
    WorkerPool,
};
use courier_core::port::id_provider::UuidProvider;
use courier_core::port::time_provider::SystemTimeProvider;
use courier_core::port::{IdProvider, TimeProvider};
use courier_infra_sqlite::{
    create_pool, run_migrations, SqliteJobStore, SqliteMaintenance, SqliteScheduleStore,
};
use settings::Settings;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let settings = Settings::load().context("Failed to load settings")?;
    telemetry::init_tracing(settings.log_format).context("Failed to initialize logging")?;

    info!("Courier Job Engine v{} starting...", VERSION);

    let engine_config = settings.engine_config();
    engine_config.validate()?;

    // 2. Database
    if let Some(parent) = std::path::Path::new(&settings.db_path).parent() {
        if !settings.db_path.starts_with("sqlite:") && !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    info!(db_path = %settings.db_path, "Initializing database...");
    let pool = create_pool(&settings.database_url()).await?;
    run_migrations(&pool).await?;

    // 3. Dependencies
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let id_provider: Arc<dyn IdProvider> = Arc::new(UuidProvider);
    let job_store = Arc::new(SqliteJobStore::new(pool.clone(), time_provider.clone()));
    let schedule_store = Arc::new(SqliteScheduleStore::new(
        pool.clone(),
        time_provider.clone(),
    ));
    let maintenance = Arc::new(SqliteMaintenance::new(pool.clone(), time_provider.clone()));

    let registry = Arc::new(tasks::builtin_registry(&settings.customer_app_url)?);
    info!(tasks = ?registry.names(), "Task registry loaded");

    let retry_policy = Arc::new(RetryPolicy::from_config(
        time_provider.clone(),
        &engine_config,
    ));

    // 4. Crash recovery: leases held by a previous process
    let sweeper = Arc::new(LeaseSweeper::new(job_store.clone(), retry_policy.clone()));
    match sweeper.sweep().await {
        Ok(report) => info!(
            requeued = report.requeued,
            buried = report.buried,
            stranded_resolved = report.stranded_resolved,
            "Crash recovery completed"
        ),
        Err(e) => error!(error = %e, "Crash recovery failed"),
    }

    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    // 5. JSON-RPC server
    let dispatcher = Arc::new(Dispatcher::new(
        job_store.clone(),
        schedule_store.clone(),
        registry.clone(),
        id_provider.clone(),
        time_provider.clone(),
    ));
    let rpc_server = RpcServer::new(
        RpcServerConfig {
            host: settings.rpc_host.clone(),
            port: settings.rpc_port,
        },
        dispatcher,
        maintenance.clone(),
        settings.maintenance_config(),
    );
    let (rpc_addr, rpc_handle) = rpc_server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;
    info!(addr = %rpc_addr, "JSON-RPC listening");

    // 6. Background services
    let pool_handle = {
        let workers = WorkerPool::new(
            job_store.clone(),
            registry.clone(),
            retry_policy.clone(),
            engine_config.clone(),
        );
        let token = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = workers.run(token).await {
                error!(error = %e, "Worker pool failed");
            }
        })
    };

    let scheduler_handle = {
        let scheduler = Scheduler::new(schedule_store, id_provider, time_provider.clone());
        let period = engine_config.scheduler_tick;
        let token = shutdown_rx.clone();
        tokio::spawn(async move { scheduler.run(period, token).await })
    };

    let sweeper_handle = {
        let period = engine_config.reclaim_interval;
        let token = shutdown_rx.clone();
        tokio::spawn(async move { sweeper.run(period, token).await })
    };

    let maintenance_handle = {
        let maintenance_scheduler = MaintenanceScheduler::new(
            maintenance,
            settings.maintenance_config(),
            settings.maintenance_interval_hours,
        );
        let token = shutdown_rx.clone();
        tokio::spawn(async move { maintenance_scheduler.run(token).await })
    };

    info!(
        concurrency = engine_config.concurrency,
        "System ready. Press Ctrl+C to shutdown"
    );

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutdown signal received. Draining workers...");

    shutdown_tx.shutdown();
    if let Err(e) = rpc_handle.stop() {
        error!(error = %e, "RPC server stop failed");
    }

    let drain = async {
        let _ = tokio::join!(
            pool_handle,
            scheduler_handle,
            sweeper_handle,
            maintenance_handle
        );
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        error!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "Shutdown grace period elapsed; in-flight leases will be reclaimed on restart"
        );
    }

    pool.close().await;
    info!("Shutdown complete.");
    Ok(())
}
