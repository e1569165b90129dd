// Lease Manager configuration.
//
// Centralizes environment variable parsing with defaults for local
// development, following the same `from_env` / testable `from_env_fn` split
// used throughout this workspace.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Result};
use warden_common::constants::{validate_ttl_ratio, HEARTBEAT_INTERVAL, LEASE_TTL};

#[derive(Debug, Clone)]
pub struct LeaseManagerConfig {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    pub log_filter: String,
    pub lease_ttl: Duration,
    pub heartbeat_interval: Duration,
}

impl LeaseManagerConfig {
    /// | Variable | Default |
    /// |---|---|
    /// | `DATABASE_URL` | *(required)* |
    /// | `PORT` | `8080` |
    /// | `LEASE_MANAGER_LOG_FILTER` | `info` |
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

        let port: u16 = env("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let log_filter = env("LEASE_MANAGER_LOG_FILTER").unwrap_or_else(|_| "info".into());

        let config = Self {
            listen_addr,
            database_url,
            log_filter,
            lease_ttl: LEASE_TTL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        validate_ttl_ratio(self.lease_ttl, self.heartbeat_interval)
            .map_err(|message| anyhow::anyhow!(message))
    }
}
