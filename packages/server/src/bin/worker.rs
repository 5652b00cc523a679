// Worker entry point: claims jobs and drives them through the publisher.

use std::sync::Arc;

use anyhow::{Context, Result};
use publisher_client::DryRunPublisher;
use server_core::kernel::dedupe::RedisDedupeStore;
use server_core::kernel::jobs::{PostgresJobQueue, WorkerRuntime};
use server_core::Config;
use sqlx::postgres::PgPoolOptions;
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

    tracing::info!("starting worker");

    let config = Config::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let dedupe = Arc::new(
        RedisDedupeStore::new(&config.dedupe_url).context("failed to construct dedupe store")?,
    );
    let queue = PostgresJobQueue::new(pool.clone(), config.max_attempts);

    // No real external publisher implementation ships with this crate; a
    // non-dry-run deployment must supply its own `Publisher` adapter.
    let publisher = Arc::new(DryRunPublisher::new());
    if !config.dry_run {
        tracing::warn!("DRY_RUN=false but only DryRunPublisher is available; publishes will not reach the external endpoint");
    }

    let worker = WorkerRuntime::new(
        pool,
        dedupe,
        queue,
        publisher,
        config.dry_run,
        config.publish_rate_limit_per_minute,
    );

    tracing::info!("worker running");
    worker.run_forever().await.context("worker loop exited")?;
    Ok(())
}
