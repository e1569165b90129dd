// `warden leases list|release` — inspect and release rows in the Lease
// Manager from the operator's terminal.

use clap::{Args, Subcommand};
use warden_common::types::dto::LeaseResponse;

use crate::client::ServiceClient;
use crate::config::CliConfig;
use crate::output::{self, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum LeasesCommand {
    /// List leases, optionally filtered by derived state
    List(ListArgs),
    /// Force-release a lease by id
    Release(ReleaseArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Filter by derived state: active, expired, released, renewed
    #[arg(long)]
    state: Option<String>,
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct ReleaseArgs {
    /// Lease id to release
    id: i64,
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

pub fn run(cmd: LeasesCommand, config: CliConfig) -> anyhow::Result<()> {
    match cmd {
        LeasesCommand::List(args) => run_list(args, config),
        LeasesCommand::Release(args) => run_release(args, config),
    }
}

fn run_list(args: ListArgs, config: CliConfig) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let result = rt.block_on(async {
        let client = ServiceClient::new(config.lease_manager_url);
        let path = match &args.state {
            Some(state) => format!("/leases?state={state}"),
            None => "/leases".to_string(),
        };
        client.get::<Vec<LeaseResponse>>(&path).await
    });

    match result {
        Ok(leases) => {
            output::print_output(format, &leases, format_human_list)?;
            Ok(())
        }
        Err(error) => {
            output::print_anyhow_error(format, &error);
            Err(error)
        }
    }
}

fn run_release(args: ReleaseArgs, config: CliConfig) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let result = rt.block_on(async {
        let client = ServiceClient::new(config.lease_manager_url);
        client.delete::<LeaseResponse>(&format!("/leases/{}", args.id)).await
    });

    match result {
        Ok(lease) => {
            output::print_output(format, &lease, format_human_one)?;
            Ok(())
        }
        Err(error) => {
            output::print_anyhow_error(format, &error);
            Err(error)
        }
    }
}

fn format_human_list(leases: &Vec<LeaseResponse>) -> String {
    if leases.is_empty() {
        return "No leases.".to_string();
    }
    let mut lines = Vec::with_capacity(leases.len());
    for lease in leases {
        lines.push(format_human_one(lease));
    }
    lines.join("\n")
}

fn format_human_one(lease: &LeaseResponse) -> String {
    format!(
        "{:>6}  {:<24} holder={:<16} expires_at={}",
        lease.id, lease.resource, lease.holder, lease.expires_at
    )
}
