//! Advisory dedupe/lock layer.
//!
//! This is strictly an optimization to prevent redundant work across
//! scheduler/sweeper replicas; correctness rests on the database's
//! UNIQUE `(schedule_id, planned_at)` constraint, not on this store.

mod in_memory;
mod redis_store;

pub use in_memory::InMemoryDedupeStore;
pub use redis_store::RedisDedupeStore;

use async_trait::async_trait;

#[async_trait]
pub trait DedupeStore: Send + Sync {
    /// Atomic set-if-absent with a TTL. Returns `true` if the lock was
    /// acquired, `false` if it was already held.
    async fn acquire(&self, key: &str, ttl: std::time::Duration) -> anyhow::Result<bool>;

    /// Unconditional delete.
    async fn release(&self, key: &str) -> anyhow::Result<()>;
}

pub fn dedupe_key(schedule_id: &str, planned_at_iso: &str) -> String {
    format!("dedupe:{schedule_id}:{planned_at_iso}")
}

pub fn cleanup_lock_key(job_id: &str) -> String {
    format!("cleanup_lock:job:{job_id}")
}
