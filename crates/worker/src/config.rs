// Worker configuration.
//
// Centralizes environment variable parsing with defaults for local
// development, following the same `from_env` / testable `from_env_fn` split
// used throughout this workspace.

use std::time::Duration;

use anyhow::{bail, Result};
use warden_common::constants::{validate_ttl_ratio, HEARTBEAT_INTERVAL, LEASE_TTL};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub task_service_url: String,
    pub processor: String,
    pub lease_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub poll_backoff_initial: Duration,
    pub poll_backoff_max: Duration,
    pub log_filter: String,
}

impl WorkerConfig {
    /// | Variable | Default |
    /// |---|---|
    /// | `TASK_SERVICE_URL` | *(required)* |
    /// | `WORKER_PROCESSOR_ID` | `worker-<pid>` |
    /// | `WORKER_LOG_FILTER` | `info` |
    pub fn from_env() -> Result<Self> {
        Self::from_env_fn(|key| std::env::var(key))
    }

    fn from_env_fn<F>(env: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let Ok(task_service_url) = env("TASK_SERVICE_URL") else {
            bail!("TASK_SERVICE_URL must be set");
        };

        let processor = env("WORKER_PROCESSOR_ID").unwrap_or_else(|_| default_processor_id());
        let log_filter = env("WORKER_LOG_FILTER").unwrap_or_else(|_| "info".into());

        let config = Self {
            task_service_url,
            processor,
            lease_ttl: LEASE_TTL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            poll_backoff_initial: Duration::from_millis(200),
            poll_backoff_max: Duration::from_secs(5),
            log_filter,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        validate_ttl_ratio(self.lease_ttl, self.heartbeat_interval)
            .map_err(|message| anyhow::anyhow!(message))
    }
}

fn default_processor_id() -> String {
    format!("worker-{}", std::process::id())
}
