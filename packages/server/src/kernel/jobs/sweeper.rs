//! Recovery sweeper: re-enqueues jobs the normal tick/worker path dropped.
//!
//! Two disjoint scans, run periodically (`~5 min`, see `bin/sweeper.rs`):
//! orphaned `enqueued` jobs whose enqueue never actually reached a worker,
//! and `planned` jobs whose tick-side enqueue step failed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::common::JobId;
use crate::error::Result;
use crate::kernel::dedupe::{cleanup_lock_key, DedupeStore};

use super::job::{JobStatus, PublishJob};
use super::queue::PostgresJobQueue;

const T_STALE: Duration = Duration::from_secs(5 * 60);
const T_COOLDOWN: Duration = Duration::from_secs(60);
const CLEANUP_LOCK_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Default)]
pub struct SweepReport {
    pub orphans_found: usize,
    pub orphans_reenqueued: usize,
    pub due_planned_found: usize,
    pub due_planned_enqueued: usize,
}

pub struct RecoverySweeper {
    db: sqlx::PgPool,
    dedupe: Arc<dyn DedupeStore>,
    queue: PostgresJobQueue,
}

impl RecoverySweeper {
    pub fn new(db: sqlx::PgPool, dedupe: Arc<dyn DedupeStore>, queue: PostgresJobQueue) -> Self {
        Self { db, dedupe, queue }
    }

    pub async fn run(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let orphans = PublishJob::find_orphaned_enqueued(
            chrono::Duration::from_std(T_STALE).unwrap(),
            chrono::Duration::from_std(T_COOLDOWN).unwrap(),
            &self.db,
        )
        .await?;
        report.orphans_found = orphans.len();
        for job_id in orphans {
            if self.reenqueue_orphan(job_id).await? {
                report.orphans_reenqueued += 1;
            }
        }

        let due_planned = PublishJob::find_due_planned(&self.db).await?;
        report.due_planned_found = due_planned.len();
        for job_id in due_planned {
            match self.queue.enqueue(job_id).await {
                Ok(_) => report.due_planned_enqueued += 1,
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "sweeper enqueue of due-planned job failed");
                }
            }
        }

        Ok(report)
    }

    /// Acquires the per-job cooldown lock, re-verifies the job is still a
    /// genuine orphan under it (another sweeper replica may have already
    /// handled it), then re-enqueues. Releases the lock in every path.
    async fn reenqueue_orphan(&self, job_id: JobId) -> Result<bool> {
        let lock_key = cleanup_lock_key(&job_id.to_string());
        let acquired = self.dedupe.acquire(&lock_key, CLEANUP_LOCK_TTL).await.unwrap_or(false);
        if !acquired {
            tracing::debug!(job_id = %job_id, "orphan already under a cleanup lock, skipping");
            return Ok(false);
        }

        let result = self.reenqueue_orphan_locked(job_id).await;
        let _ = self.dedupe.release(&lock_key).await;
        result
    }

    async fn reenqueue_orphan_locked(&self, job_id: JobId) -> Result<bool> {
        let Some(job) = PublishJob::find_by_id(job_id, &self.db).await? else {
            tracing::warn!(job_id = %job_id, "orphan vanished before re-enqueue");
            return Ok(false);
        };

        if job.status != JobStatus::Enqueued || job.started_at.is_some() {
            tracing::debug!(job_id = %job_id, status = ?job.status, "no longer an orphan, skipping");
            return Ok(false);
        }

        let recently_touched = job
            .enqueued_at
            .is_some_and(|t| Utc::now() - t < chrono::Duration::from_std(T_COOLDOWN).unwrap());
        if recently_touched {
            tracing::debug!(job_id = %job_id, "enqueued_at moved inside the cooldown window, skipping");
            return Ok(false);
        }

        self.queue.enqueue(job_id).await?;
        tracing::info!(job_id = %job_id, "re-enqueued orphaned job");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::dedupe::InMemoryDedupeStore;

    #[test]
    fn lock_key_is_namespaced_per_job() {
        let job_id = JobId::new();
        let key = cleanup_lock_key(&job_id.to_string());
        assert!(key.starts_with("cleanup_lock:job:"));
        assert!(key.contains(&job_id.to_string()));
    }

    #[tokio::test]
    async fn cleanup_lock_prevents_concurrent_sweeper_replicas() {
        let dedupe = InMemoryDedupeStore::new();
        let job_id = JobId::new();
        let key = cleanup_lock_key(&job_id.to_string());
        assert!(dedupe.acquire(&key, CLEANUP_LOCK_TTL).await.unwrap());
        assert!(!dedupe.acquire(&key, CLEANUP_LOCK_TTL).await.unwrap());
    }
}
