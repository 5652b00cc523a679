//! Operator CLI for the scheduler and publish pipeline.
//!
//! Talks directly to the database; no HTTP surface to go through.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use server_core::kernel::dedupe::InMemoryDedupeStore;
use server_core::kernel::jobs::{JobStatus, PostgresJobQueue, PublishJob, SchedulerTick};
use server_core::Config;
use sqlx::postgres::PgPoolOptions;

#[derive(Parser)]
#[command(name = "dev")]
#[command(about = "Operator CLI for the scheduler and publish pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Job queue and schedule inspection/operations
    #[command(subcommand)]
    Jobs(JobsCommands),
    #[command(subcommand)]
    Schedule(ScheduleCommands),
}

#[derive(Subcommand)]
enum JobsCommands {
    /// Print job counts grouped by status
    Stats,
}

#[derive(Subcommand)]
enum ScheduleCommands {
    /// List all schedules
    List,
    /// Force a schedule to fire immediately (bypassing next_run_at)
    Trigger {
        /// Schedule id (UUID)
        id: uuid::Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    match cli.command {
        Commands::Jobs(JobsCommands::Stats) => jobs_stats(&pool).await,
        Commands::Schedule(ScheduleCommands::List) => schedule_list(&pool).await,
        Commands::Schedule(ScheduleCommands::Trigger { id }) => {
            schedule_trigger(pool, config, id).await
        }
    }
}

async fn jobs_stats(pool: &sqlx::PgPool) -> Result<()> {
    let stats = PublishJob::statistics(pool)
        .await
        .context("failed to load job statistics")?;

    if stats.is_empty() {
        println!("no jobs");
        return Ok(());
    }

    let mut total = 0i64;
    for (status, count) in &stats {
        println!("{:>12}  {}", format_status(*status), count);
        total += count;
    }
    println!("{:>12}  {}", "total", total);
    Ok(())
}

fn format_status(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Planned => "planned",
        JobStatus::Enqueued => "enqueued",
        JobStatus::Running => "running",
        JobStatus::Succeeded => "succeeded",
        JobStatus::Failed => "failed",
        JobStatus::DeadLetter => "dead_letter",
        JobStatus::Cancelled => "cancelled",
    }
}

async fn schedule_list(pool: &sqlx::PgPool) -> Result<()> {
    let schedules = server_core::domains::schedules::Schedule::list(pool)
        .await
        .context("failed to list schedules")?;

    if schedules.is_empty() {
        println!("no schedules");
        return Ok(());
    }

    for s in schedules {
        println!(
            "{}  {:?}  enabled={}  next_run_at={}",
            s.id,
            s.kind,
            s.enabled,
            s.next_run_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unresolved".to_string())
        );
    }
    Ok(())
}

async fn schedule_trigger(pool: sqlx::PgPool, config: Config, id: uuid::Uuid) -> Result<()> {
    // A manual trigger is a diagnostic tool, not a coordinated fleet
    // operation, so it uses the in-memory dedupe store rather than reaching
    // out to the shared Redis lock.
    let dedupe = Arc::new(InMemoryDedupeStore::new());
    let queue = PostgresJobQueue::new(pool.clone(), config.max_attempts);
    let tick = SchedulerTick::new(pool, dedupe, queue);

    let schedule_id = server_core::common::ScheduleId::from_uuid(id);
    match tick
        .trigger_schedule(schedule_id)
        .await
        .context("failed to trigger schedule")?
    {
        Some(job_id) => println!("materialized job {job_id}"),
        None => println!("schedule did not fire (disabled, unresolvable, or already due job exists)"),
    }
    Ok(())
}
