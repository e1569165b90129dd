use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use warden_worker::config::WorkerConfig;
use warden_worker::transport::HttpTaskDispatcherClient;
use warden_worker::worker;

#[tokio::main]
async fn main() -> Result<()> {
    let config = WorkerConfig::from_env().context("failed to load worker config")?;
    init_tracing(&config.log_filter);

    let client =
        Arc::new(HttpTaskDispatcherClient::new(config.task_service_url.clone(), config.lease_ttl));

    tracing::info!(processor = %config.processor, task_service_url = %config.task_service_url, "worker starting");

    // Standalone binary default: echo task_data back as output. Embed this
    // crate as a library and call `worker::spawn` with a real handler to
    // do anything else.
    let handle = worker::spawn(client, config, |task_data| async move { Ok(task_data) });

    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    handle.wait().await;
    Ok(())
}

fn init_tracing(log_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).json().flatten_event(true).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
