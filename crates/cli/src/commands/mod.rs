// CLI subcommand dispatch.

use clap::Subcommand;

pub mod leases;
pub mod seed;
pub mod tasks;
pub mod worker;

use crate::config::CliConfig;

#[derive(Subcommand)]
pub enum Command {
    /// Inspect or release leases
    Leases {
        #[command(subcommand)]
        command: leases::LeasesCommand,
    },
    /// Inspect tasks
    Tasks {
        #[command(subcommand)]
        command: tasks::TasksCommand,
    },
    /// Run a worker loop in-process
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },
    /// Insert demo tasks for local development
    Seed(seed::SeedArgs),
}

#[derive(Subcommand)]
pub enum WorkerCommand {
    /// Poll the task dispatcher and run an echo handler until Ctrl+C
    Run(worker::RunArgs),
}

pub fn run(cmd: Command, config: CliConfig) -> anyhow::Result<()> {
    match cmd {
        Command::Leases { command } => leases::run(command, config),
        Command::Tasks { command } => tasks::run(command, config),
        Command::Worker { command } => match command {
            WorkerCommand::Run(args) => worker::run(args, config),
        },
        Command::Seed(args) => seed::run(args, config),
    }
}
