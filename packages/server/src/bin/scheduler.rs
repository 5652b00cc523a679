// Scheduler entry point: resolves due schedules and materializes jobs.

use std::sync::Arc;

use anyhow::{Context, Result};
use server_core::kernel::dedupe::RedisDedupeStore;
use server_core::kernel::jobs::{PostgresJobQueue, SchedulerTick};
use server_core::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting scheduler");

    let config = Config::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    tracing::info!("running database migrations");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let dedupe = Arc::new(
        RedisDedupeStore::new(&config.dedupe_url).context("failed to construct dedupe store")?,
    );
    let queue = PostgresJobQueue::new(pool.clone(), config.max_attempts);
    let tick = Arc::new(SchedulerTick::new(pool, dedupe, queue));

    let seeded = tick
        .initialize_schedules()
        .await
        .context("failed to bootstrap unresolved schedules")?;
    tracing::info!(seeded, "bootstrap complete");

    let scheduler = JobScheduler::new().await.context("failed to start job scheduler")?;
    let interval = config.tick_interval_seconds.max(1);
    let cron_tick = tick.clone();
    scheduler
        .add(Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _l| {
                let tick = cron_tick.clone();
                Box::pin(async move {
                    match tick.run().await {
                        Ok(report) => tracing::info!(?report, "tick complete"),
                        Err(e) => tracing::error!(error = %e, "tick failed"),
                    }
                })
            },
        )?)
        .await
        .context("failed to register tick job")?;

    let health_tick = tick.clone();
    scheduler
        .add(Job::new_repeated_async(
            std::time::Duration::from_secs(60),
            move |_uuid, _l| {
                let tick = health_tick.clone();
                Box::pin(async move {
                    if let Err(e) = tick.health_check().await {
                        tracing::error!(error = %e, "health check failed");
                    }
                })
            },
        )?)
        .await
        .context("failed to register health check job")?;

    scheduler.start().await.context("failed to run job scheduler")?;

    tracing::info!(interval_seconds = interval, "scheduler running");
    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down scheduler");
    Ok(())
}
