use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Advisory dedupe/lock store connection string.
    pub dedupe_url: String,
    /// Reserved for a future non-Postgres queue transport; accepted but
    /// unused since this crate's queue adapter is the job table itself.
    pub queue_url: Option<String>,
    pub default_timezone: String,
    pub dry_run: bool,
    pub max_attempts: i32,
    pub publish_rate_limit_per_minute: u32,
    pub tick_interval_seconds: u64,
    pub sweeper_interval_seconds: u64,
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            dedupe_url: env::var("DEDUPE_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            queue_url: env::var("QUEUE_URL").ok(),
            default_timezone: env::var("DEFAULT_TIMEZONE").unwrap_or_else(|_| "UTC".to_string()),
            dry_run: env::var("DRY_RUN")
                .map(|v| v.parse().unwrap_or(true))
                .unwrap_or(true),
            max_attempts: env::var("MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("MAX_ATTEMPTS must be a valid number")?,
            publish_rate_limit_per_minute: env::var("PUBLISH_RATE_LIMIT_PER_MINUTE")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("PUBLISH_RATE_LIMIT_PER_MINUTE must be a valid number")?,
            tick_interval_seconds: env::var("TICK_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("TICK_INTERVAL_SECONDS must be a valid number")?,
            sweeper_interval_seconds: env::var("SWEEPER_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("SWEEPER_INTERVAL_SECONDS must be a valid number")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
        })
    }
}
