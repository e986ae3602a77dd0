//! Daemon settings
//!
//! Defaults overlaid with `COURIER_*` environment variables, e.g.
//! `COURIER_DB_PATH`, `COURIER_RPC_PORT`, `COURIER_CONCURRENCY`.

use config::{Config, ConfigError, Environment};
use courier_core::application::EngineConfig;
use courier_core::port::MaintenanceConfig;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "~/.courier/courier.db";
const DEFAULT_CUSTOMER_APP_URL: &str = "http://localhost:3000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: String,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub log_format: LogFormat,

    pub concurrency: usize,
    pub lease_duration_secs: u64,
    pub soft_time_limit_secs: u64,
    pub hard_time_limit_secs: u64,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_secs: u64,
    pub retry_jitter: f64,
    pub reclaim_interval_secs: u64,
    pub scheduler_tick_ms: u64,

    pub retention_days: i64,
    pub max_db_size_mb: f64,
    pub maintenance_interval_hours: u64,

    /// Base URL for links in customer emails
    pub customer_app_url: String,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_builder(Config::builder().add_source(Environment::with_prefix("COURIER")))
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let engine = EngineConfig::default();
        let maintenance = MaintenanceConfig::default();

        let mut settings: Settings = builder
            .set_default("db_path", DEFAULT_DB_PATH)?
            .set_default("rpc_host", "127.0.0.1")?
            .set_default("rpc_port", 9627)?
            .set_default("log_format", "pretty")?
            .set_default("concurrency", engine.concurrency as u64)?
            .set_default("lease_duration_secs", engine.lease_duration.as_secs())?
            .set_default("soft_time_limit_secs", engine.soft_time_limit.as_secs())?
            .set_default("hard_time_limit_secs", engine.hard_time_limit.as_secs())?
            .set_default(
                "base_retry_delay_ms",
                engine.base_retry_delay.as_millis() as u64,
            )?
            .set_default("max_retry_delay_secs", engine.max_retry_delay.as_secs())?
            .set_default("retry_jitter", engine.retry_jitter)?
            .set_default("reclaim_interval_secs", engine.reclaim_interval.as_secs())?
            .set_default("scheduler_tick_ms", engine.scheduler_tick.as_millis() as u64)?
            .set_default("retention_days", maintenance.finished_job_retention_days)?
            .set_default("max_db_size_mb", maintenance.max_db_size_mb)?
            .set_default("maintenance_interval_hours", 24)?
            .set_default("customer_app_url", DEFAULT_CUSTOMER_APP_URL)?
            .build()?
            .try_deserialize()?;

        settings.db_path = expand_db_path(&settings.db_path);
        Ok(settings)
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default()
            .with_lease_duration(Duration::from_secs(self.lease_duration_secs));
        config.concurrency = self.concurrency;
        config.soft_time_limit = Duration::from_secs(self.soft_time_limit_secs);
        config.hard_time_limit = Duration::from_secs(self.hard_time_limit_secs);
        config.base_retry_delay = Duration::from_millis(self.base_retry_delay_ms);
        config.max_retry_delay = Duration::from_secs(self.max_retry_delay_secs);
        config.retry_jitter = self.retry_jitter;
        config.reclaim_interval = Duration::from_secs(self.reclaim_interval_secs);
        config.scheduler_tick = Duration::from_millis(self.scheduler_tick_ms);
        config
    }

    pub fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            finished_job_retention_days: self.retention_days,
            max_db_size_mb: self.max_db_size_mb,
        }
    }

    /// sqlx connection URL for the configured path
    pub fn database_url(&self) -> String {
        if self.db_path.starts_with("sqlite:") {
            self.db_path.clone()
        } else {
            format!("sqlite://{}", self.db_path)
        }
    }
}

fn expand_db_path(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}
