// `warden seed` — insert demo tasks directly into the Task Store. There is
// no HTTP endpoint for scheduling work (task creation is out of scope for
// the dispatcher's own surface); this talks straight to Postgres, the way a
// one-off fixture script would, not through `warden-tasks`.

use anyhow::{Context, Result};
use clap::Args;
use sqlx::postgres::PgPoolOptions;

use crate::config::CliConfig;

#[derive(Debug, Args)]
pub struct SeedArgs {
    /// Number of demo tasks to insert
    #[arg(long, default_value_t = 10)]
    count: u32,
}

pub fn run(args: SeedArgs, config: CliConfig) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(args, config))
}

async fn run_async(args: SeedArgs, config: CliConfig) -> Result<()> {
    let database_url = config
        .database_url
        .context("DATABASE_URL must be set to seed tasks (it is the task dispatcher's own database)")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to the task dispatcher database")?;

    let mut inserted = 0u32;
    for n in 0..args.count {
        let task_data = serde_json::json!({"seed_index": n});
        sqlx::query("INSERT INTO tasks (task_data) VALUES ($1)")
            .bind(&task_data)
            .execute(&pool)
            .await
            .context("failed to insert seed task")?;
        inserted += 1;
    }

    println!("seeded {inserted} task(s)");
    Ok(())
}
