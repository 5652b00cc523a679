//! In-memory `DedupeStore` for tests and single-process deployments.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::DedupeStore;

#[derive(Default)]
pub struct InMemoryDedupeStore {
    entries: Mutex<HashMap<String, Instant>>,
}

impl InMemoryDedupeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupeStore for InMemoryDedupeStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if let Some(expires_at) = entries.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        entries.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn release(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_of_same_key_fails_until_released() {
        let store = InMemoryDedupeStore::new();
        assert!(store.acquire("k", Duration::from_secs(60)).await.unwrap());
        assert!(!store.acquire("k", Duration::from_secs(60)).await.unwrap());
        store.release("k").await.unwrap();
        assert!(store.acquire("k", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn expired_entry_can_be_reacquired() {
        let store = InMemoryDedupeStore::new();
        assert!(store.acquire("k", Duration::from_millis(1)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.acquire("k", Duration::from_secs(60)).await.unwrap());
    }
}
