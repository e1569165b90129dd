// Task Dispatcher configuration.
//
// Centralizes environment variable parsing with defaults for local
// development, following the same `from_env` / testable `from_env_fn` split
// used throughout this workspace.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Result};
use warden_common::constants::{validate_ttl_ratio, HEARTBEAT_INTERVAL, LEASE_TTL};

#[derive(Debug, Clone)]
pub struct TaskDispatcherConfig {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    pub log_filter: String,
    pub lease_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub lease_manager_url: String,
}

impl TaskDispatcherConfig {
    /// | Variable | Default |
    /// |---|---|
    /// | `DATABASE_URL` | *(required)* |
    /// | `SERVICE_LEASES_URL` | *(required)* |
    /// | `PORT` | `8081` |
    /// | `TASK_DISPATCHER_LOG_FILTER` | `info` |
    pub fn from_env() -> Result<Self> {
        Self::from_env_fn(|key| std::env::var(key))
    }

    fn from_env_fn<F>(env: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let Ok(database_url) = env("DATABASE_URL") else {
            bail!("DATABASE_URL must be set");
        };
        let Ok(lease_manager_url) = env("SERVICE_LEASES_URL") else {
            bail!("SERVICE_LEASES_URL must be set");
        };

        let port: u16 = env("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8081);
        let listen_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let log_filter = env("TASK_DISPATCHER_LOG_FILTER").unwrap_or_else(|_| "info".into());

        let config = Self {
            listen_addr,
            database_url,
            log_filter,
            lease_ttl: LEASE_TTL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            lease_manager_url,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        validate_ttl_ratio(self.lease_ttl, self.heartbeat_interval)
            .map_err(|message| anyhow::anyhow!(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
    }

    #[test]
    fn requires_database_url() {
        let mut m = HashMap::new();
        m.insert("SERVICE_LEASES_URL", "http://localhost:8080");
        let error = TaskDispatcherConfig::from_env_fn(env_from_map(m))
            .expect_err("missing DATABASE_URL should fail");
        assert!(error.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn requires_lease_manager_url() {
        let mut m = HashMap::new();
        m.insert("DATABASE_URL", "postgres://u:p@host/db");
        let error = TaskDispatcherConfig::from_env_fn(env_from_map(m))
            .expect_err("missing SERVICE_LEASES_URL should fail");
        assert!(error.to_string().contains("SERVICE_LEASES_URL"));
    }

    #[test]
    fn defaults_port_to_8081() {
        let mut m = HashMap::new();
        m.insert("DATABASE_URL", "postgres://u:p@host/db");
        m.insert("SERVICE_LEASES_URL", "http://localhost:8080");
        let cfg = TaskDispatcherConfig::from_env_fn(env_from_map(m)).unwrap();
        assert_eq!(cfg.listen_addr.port(), 8081);
    }
}
