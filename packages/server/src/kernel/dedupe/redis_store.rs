//! Redis-backed `DedupeStore`: `SET key value NX EX ttl` to acquire, `DEL` to release.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use super::DedupeStore;

pub struct RedisDedupeStore {
    client: redis::Client,
}

impl RedisDedupeStore {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }
}

#[async_trait]
impl DedupeStore for RedisDedupeStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let acquired: bool = conn
            .set_options(
                key,
                "1",
                redis::SetOptions::default()
                    .conditional_set(redis::ExistenceCheck::NX)
                    .with_expiration(redis::SetExpiry::EX(ttl.as_secs().max(1) as usize)),
            )
            .await
            .unwrap_or(false);
        Ok(acquired)
    }

    async fn release(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}
