// warden CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod client;
mod commands;
mod config;
mod exit_code;
mod output;

use config::CliConfig;
use exit_code::ExitCode;

#[derive(Parser)]
#[command(name = "warden", about = "Operator CLI for the lease-coordinated task dispatch system")]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let config = CliConfig::from_env();

    match commands::run(cli.command, config) {
        Ok(()) => ExitCode::Success.exit(),
        Err(error) => ExitCode::from_error(&error).exit(),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
