// Recovery sweeper entry point: re-enqueues orphaned and due-planned jobs.

use std::sync::Arc;

use anyhow::{Context, Result};
use server_core::kernel::dedupe::RedisDedupeStore;
use server_core::kernel::jobs::{PostgresJobQueue, RecoverySweeper};
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

    tracing::info!("starting sweeper");

    let config = Config::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
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
    let sweeper = RecoverySweeper::new(pool, dedupe, queue);

    let interval = std::time::Duration::from_secs(config.sweeper_interval_seconds.max(1));
    tracing::info!(interval_seconds = interval.as_secs(), "sweeper running");
    loop {
        match sweeper.run().await {
            Ok(report) => tracing::info!(?report, "sweep complete"),
            Err(e) => tracing::error!(error = %e, "sweep failed"),
        }
        tokio::time::sleep(interval).await;
    }
}
