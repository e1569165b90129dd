// `warden tasks list|get|started|processed` — inspect rows in the Task
// Dispatcher from the operator's terminal.

use clap::{Args, Subcommand};
use warden_common::types::dto::TaskResponse;

use crate::client::ServiceClient;
use crate::config::CliConfig;
use crate::output::{self, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum TasksCommand {
    /// List every task
    List(ListArgs),
    /// Fetch a single task by id
    Get(GetArgs),
    /// List tasks currently assigned to a processor
    Started(ListArgs),
    /// List completed tasks
    Processed(ListArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Task id to fetch
    id: i64,
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

pub fn run(cmd: TasksCommand, config: CliConfig) -> anyhow::Result<()> {
    match cmd {
        TasksCommand::List(args) => run_list(args.json, "/tasks", config),
        TasksCommand::Started(args) => run_list(args.json, "/tasks/started", config),
        TasksCommand::Processed(args) => run_list(args.json, "/tasks/processed", config),
        TasksCommand::Get(args) => run_get(args, config),
    }
}

fn run_list(json_flag: bool, path: &str, config: CliConfig) -> anyhow::Result<()> {
    let format = OutputFormat::detect(json_flag);
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let result = rt.block_on(async {
        let client = ServiceClient::new(config.task_service_url);
        client.get::<Vec<TaskResponse>>(path).await
    });

    match result {
        Ok(tasks) => {
            output::print_output(format, &tasks, format_human_list)?;
            Ok(())
        }
        Err(error) => {
            output::print_anyhow_error(format, &error);
            Err(error)
        }
    }
}

fn run_get(args: GetArgs, config: CliConfig) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let result = rt.block_on(async {
        let client = ServiceClient::new(config.task_service_url);
        client.get::<TaskResponse>(&format!("/tasks/{}", args.id)).await
    });

    match result {
        Ok(task) => {
            output::print_output(format, &task, format_human_one)?;
            Ok(())
        }
        Err(error) => {
            output::print_anyhow_error(format, &error);
            Err(error)
        }
    }
}

fn format_human_list(tasks: &Vec<TaskResponse>) -> String {
    if tasks.is_empty() {
        return "No tasks.".to_string();
    }
    let mut lines = Vec::with_capacity(tasks.len());
    for task in tasks {
        lines.push(format_human_one(task));
    }
    lines.join("\n")
}

fn format_human_one(task: &TaskResponse) -> String {
    format!(
        "{:>6}  processor={:<16} started_at={:<28} processed_at={}",
        task.id,
        task.processor.as_deref().unwrap_or("-"),
        task.started_at.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
        task.processed_at.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> TaskResponse {
        TaskResponse {
            id: 7,
            task_data: serde_json::json!({"n": 1}),
            task_output: None,
            scheduled_at: chrono::Utc::now(),
            started_at: None,
            last_heartbeat_at: None,
            must_heartbeat_before: None,
            processed_at: None,
            processor: None,
        }
    }

    #[test]
    fn human_list_empty_says_no_tasks() {
        assert_eq!(format_human_list(&vec![]), "No tasks.");
    }

    #[test]
    fn human_one_uses_dash_for_unset_fields() {
        let line = format_human_one(&sample_task());
        assert!(line.contains("processor=-"));
        assert!(line.contains("started_at=-"));
    }
}
