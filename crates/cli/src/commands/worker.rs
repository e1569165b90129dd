// `warden worker run` — run a worker loop against the Task Dispatcher
// in-process, using the same library the standalone `warden-worker` binary
// embeds. Useful for local development without a second process.

use std::sync::Arc;

use clap::Args;
use warden_common::constants::LEASE_TTL;
use warden_worker::transport::HttpTaskDispatcherClient;
use warden_worker::worker;

use crate::config::CliConfig;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Processor id to claim tasks under. Defaults to `cli-worker-<pid>`.
    #[arg(long)]
    processor: Option<String>,
}

pub fn run(args: RunArgs, config: CliConfig) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(args, config))
}

async fn run_async(args: RunArgs, config: CliConfig) -> anyhow::Result<()> {
    let processor = args.processor.unwrap_or_else(|| format!("cli-worker-{}", std::process::id()));
    let worker_config = warden_worker::config::WorkerConfig {
        task_service_url: config.task_service_url.clone(),
        processor: processor.clone(),
        lease_ttl: LEASE_TTL,
        heartbeat_interval: warden_common::constants::HEARTBEAT_INTERVAL,
        poll_backoff_initial: std::time::Duration::from_millis(200),
        poll_backoff_max: std::time::Duration::from_secs(5),
        log_filter: "info".into(),
    };

    let client = Arc::new(HttpTaskDispatcherClient::new(config.task_service_url.clone(), LEASE_TTL));

    tracing::info!(%processor, task_service_url = %config.task_service_url, "starting inline worker");
    let handle = worker::spawn(client, worker_config, |task_data| async move { Ok(task_data) });

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown requested, draining current task");
    handle.wait().await;
    Ok(())
}
