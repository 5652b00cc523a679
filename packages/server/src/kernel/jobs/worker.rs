//! Worker runtime: drives one job at a time from the queue through the
//! publisher.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use publisher_client::{Publisher, PublisherError};

use crate::common::JobId;
use crate::domains::posts::{Post, PostVariant, PublishedPost};
use crate::domains::schedules::Schedule;
use crate::error::Result;
use crate::kernel::dedupe::{dedupe_key, DedupeStore};

use super::job::PublishJob;
use super::queue::PostgresJobQueue;

const SOFT_TIMEOUT: Duration = Duration::from_secs(4 * 60);
const HARD_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct WorkerRuntime {
    db: sqlx::PgPool,
    dedupe: Arc<dyn DedupeStore>,
    queue: PostgresJobQueue,
    publisher: Arc<dyn Publisher>,
    dry_run: bool,
    rate_limiter: DefaultDirectRateLimiter,
}

enum PublishStepError {
    ContentMissing(String),
    Transient(String),
    Permanent(String),
}

impl WorkerRuntime {
    pub fn new(
        db: sqlx::PgPool,
        dedupe: Arc<dyn DedupeStore>,
        queue: PostgresJobQueue,
        publisher: Arc<dyn Publisher>,
        dry_run: bool,
        rate_limit_per_minute: u32,
    ) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(rate_limit_per_minute.max(1)).unwrap());
        Self {
            db,
            dedupe,
            queue,
            publisher,
            dry_run,
            rate_limiter: RateLimiter::direct(quota),
        }
    }

    /// Claims and drives one job to completion. Returns `false` if nothing
    /// was ready to claim, so the caller can back off.
    pub async fn tick(&self) -> Result<bool> {
        let mut claimed = self.queue.claim(1).await?;
        let Some(job) = claimed.pop() else {
            return Ok(false);
        };

        self.rate_limiter.until_ready().await;

        if let Err(e) = self.run_job(job).await {
            tracing::warn!(error = %e, "worker job run failed");
        }
        Ok(true)
    }

    /// Polls forever, sleeping between empty claims. Intended for
    /// `bin/worker.rs`'s main loop.
    pub async fn run_forever(&self) -> Result<()> {
        loop {
            if !self.tick().await? {
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
        }
    }

    async fn run_job(&self, job: PublishJob) -> Result<()> {
        let job_id = job.id;
        let lock_key = dedupe_key(
            &job.schedule_id.to_string(),
            &job.planned_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        );

        // Terminal-state detection is the first action: a job can be
        // cancelled (soft-delete cascade) between claim and run.
        if job.status.is_terminal() {
            tracing::info!(job_id = %job_id, status = ?job.status, "job already terminal, skipping");
            return Ok(());
        }

        match self.resolve_and_publish(&job).await {
            Ok((external_id, text, url)) => {
                // Re-check: the job may have been cancelled out from under us
                // during the (up to 5 minute) publish call above.
                let current = PublishJob::find_by_id(job_id, &self.db).await?;
                if current.map(|j| j.status.is_terminal()).unwrap_or(true) {
                    tracing::info!(job_id = %job_id, "job became terminal mid-publish, not recording outcome");
                    let _ = self.dedupe.release(&lock_key).await;
                    return Ok(());
                }

                let post_id = self.post_id_for(&job).await?;
                let mut published = PublishedPost::builder().external_id(external_id).build();
                published.post_id = post_id;
                published.variant_id = job.variant_id;
                published.url = url;
                published.find_or_create(&self.db).await?;

                self.queue.mark_succeeded(job_id).await?;
                tracing::info!(job_id = %job_id, text_len = text.len(), "published");
            }
            Err(PublishStepError::ContentMissing(msg)) => {
                // Content resolution failed before anything was attempted;
                // the job already left `enqueued` at step 2, so this follows
                // the normal failed/retry path rather than being dropped.
                tracing::error!(job_id = %job_id, error = %msg, "content resolution failed");
                self.fail_and_maybe_dead_letter(job_id, &msg).await?;
            }
            Err(PublishStepError::Transient(msg)) => {
                tracing::warn!(job_id = %job_id, error = %msg, "transient publish failure");
                self.fail_and_maybe_dead_letter(job_id, &msg).await?;
            }
            Err(PublishStepError::Permanent(msg)) => {
                tracing::error!(job_id = %job_id, error = %msg, "permanent publish failure");
                self.queue.mark_failed(job_id, &msg).await?;
                self.queue.dead_letter(job_id).await?;
            }
        }

        let _ = self.dedupe.release(&lock_key).await;
        Ok(())
    }

    async fn fail_and_maybe_dead_letter(&self, job_id: JobId, msg: &str) -> Result<()> {
        let failed = self.queue.mark_failed(job_id, msg).await?;
        if self.queue.attempts_exhausted(&failed) {
            self.queue.dead_letter(job_id).await?;
        }
        Ok(())
    }

    async fn post_id_for(&self, job: &PublishJob) -> Result<Option<crate::common::PostId>> {
        if job.variant_id.is_some() {
            return Ok(None);
        }
        let schedule = Schedule::find_by_id(job.schedule_id, &self.db).await?;
        Ok(schedule.and_then(|s| s.post_id))
    }

    async fn resolve_and_publish(
        &self,
        job: &PublishJob,
    ) -> std::result::Result<(String, String, Option<String>), PublishStepError> {
        let (text, media_refs) = self.resolve_content(job).await?;
        let media_ids = media_ids_from(media_refs.as_ref());

        let publish_fut = self.publisher.publish(&text, media_ids.as_deref(), self.dry_run);
        tokio::pin!(publish_fut);

        // Exceeding either the soft or the hard limit raises a transient
        // failure and follows the retry path; the soft limit just fires
        // first in the common case where the publish call hangs.
        let outcome = tokio::select! {
            res = &mut publish_fut => res,
            _ = tokio::time::sleep(SOFT_TIMEOUT) => {
                tracing::warn!(job_id = %job.id, "publish exceeded soft time limit");
                Err(PublisherError::Transient(
                    "publish exceeded soft time limit".into(),
                ))
            }
            _ = tokio::time::sleep(HARD_TIMEOUT) => {
                tracing::warn!(job_id = %job.id, "publish exceeded hard time limit");
                Err(PublisherError::Transient(
                    "publish exceeded hard time limit".into(),
                ))
            }
        };

        match outcome {
            Ok(o) => Ok((o.external_id, o.text, o.url)),
            Err(e) if e.is_transient() => Err(PublishStepError::Transient(e.to_string())),
            Err(e) => Err(PublishStepError::Permanent(e.to_string())),
        }
    }

    async fn resolve_content(
        &self,
        job: &PublishJob,
    ) -> std::result::Result<(String, Option<serde_json::Value>), PublishStepError> {
        if let Some(variant_id) = job.variant_id {
            let variant = PostVariant::find_by_id(variant_id, &self.db)
                .await
                .map_err(|e| PublishStepError::ContentMissing(e.to_string()))?
                .ok_or_else(|| {
                    PublishStepError::ContentMissing(format!("variant {variant_id} not found"))
                })?;
            return Ok((variant.text, variant.media_refs));
        }

        let schedule = Schedule::find_by_id(job.schedule_id, &self.db)
            .await
            .map_err(|e| PublishStepError::ContentMissing(e.to_string()))?
            .ok_or_else(|| PublishStepError::ContentMissing("schedule not found".into()))?;
        let post_id = schedule.post_id.ok_or_else(|| {
            PublishStepError::ContentMissing("schedule has no post_id or variant_id".into())
        })?;
        let post = Post::find_by_id(post_id, &self.db)
            .await
            .map_err(|e| PublishStepError::ContentMissing(e.to_string()))?
            .ok_or_else(|| PublishStepError::ContentMissing(format!("post {post_id} not found")))?;
        if post.deleted {
            return Err(PublishStepError::ContentMissing(format!("post {post_id} is deleted")));
        }
        Ok((post.text, post.media_refs))
    }
}

fn media_ids_from(media_refs: Option<&serde_json::Value>) -> Option<Vec<String>> {
    media_refs?
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(|s| s.to_string()))
        .collect()
}
