//! Postgres-backed job queue: enqueue, skip-locked claim, retry/dead-letter.

use chrono::Utc;

use crate::common::JobId;
use crate::error::Result;

use super::job::{JobStatus, PublishJob};

pub struct PostgresJobQueue {
    db: sqlx::PgPool,
    max_attempts: i32,
}

impl PostgresJobQueue {
    pub fn new(db: sqlx::PgPool, max_attempts: i32) -> Self {
        Self { db, max_attempts }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.db
    }

    /// `planned → enqueued`. Refreshes `enqueued_at` even if the job is
    /// already `enqueued` (the sweeper calls this on jobs it is re-enqueuing
    /// after an orphan scan, so the timestamp must move or the job looks
    /// stale again on the very next sweep); re-enqueuing an in-flight job
    /// must not error.
    pub async fn enqueue(&self, job_id: JobId) -> Result<PublishJob> {
        let job = PublishJob::find_by_id(job_id, &self.db)
            .await?
            .ok_or_else(|| crate::error::SchedulerError::NotFound {
                what: "publish_job",
                id: job_id.to_string(),
            })?;
        if job.status == JobStatus::Enqueued {
            let row = sqlx::query_as::<_, PublishJob>(
                r#"
                UPDATE publish_jobs
                SET enqueued_at = NOW(), updated_at = NOW()
                WHERE id = $1
                RETURNING id, schedule_id, planned_at, enqueued_at, started_at, finished_at,
                          status, attempt, error, retry_at, dedupe_key, variant_id,
                          selection_policy, selection_seed, selected_at, created_at, updated_at
                "#,
            )
            .bind(job_id)
            .fetch_one(&self.db)
            .await?;
            return Ok(row);
        }
        PublishJob::transition(
            job_id,
            JobStatus::Enqueued,
            |j| j.enqueued_at = Some(Utc::now()),
            &self.db,
        )
        .await
    }

    /// Claim up to `limit` jobs ready for execution: jobs in `enqueued`,
    /// jobs in `failed` whose backoff has elapsed, or due `planned` jobs
    /// (the `planned → running` crash-recovery extension to the transition
    /// table; covers a worker that received the job out-of-band before the
    /// enqueue-side transition committed). Atomically transitions each to
    /// `running`, setting `started_at` and incrementing `attempt`.
    pub async fn claim(&self, limit: i64) -> Result<Vec<PublishJob>> {
        let jobs = sqlx::query_as::<_, PublishJob>(
            r#"
            WITH ready AS (
                SELECT id FROM publish_jobs
                WHERE status = 'enqueued'
                   OR (status = 'failed' AND retry_at IS NOT NULL AND retry_at <= NOW())
                   OR (status = 'planned' AND planned_at <= NOW())
                ORDER BY planned_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE publish_jobs
            SET status = 'running',
                started_at = NOW(),
                attempt = attempt + 1,
                retry_at = NULL,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM ready)
            RETURNING id, schedule_id, planned_at, enqueued_at, started_at, finished_at,
                      status, attempt, error, retry_at, dedupe_key, variant_id,
                      selection_policy, selection_seed, selected_at, created_at, updated_at
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(jobs)
    }

    /// `running → succeeded`.
    pub async fn mark_succeeded(&self, job_id: JobId) -> Result<PublishJob> {
        PublishJob::transition(
            job_id,
            JobStatus::Succeeded,
            |j| j.finished_at = Some(Utc::now()),
            &self.db,
        )
        .await
    }

    /// `running → failed`, scheduling a backoff retry if the attempt budget
    /// allows it. Caller is responsible for calling [`Self::dead_letter`]
    /// once the budget is exhausted (step 6 of the worker runtime).
    pub async fn mark_failed(&self, job_id: JobId, error: &str) -> Result<PublishJob> {
        let current = PublishJob::find_by_id(job_id, &self.db)
            .await?
            .ok_or_else(|| crate::error::SchedulerError::NotFound {
                what: "publish_job",
                id: job_id.to_string(),
            })?;

        let retry_at = if current.attempt < self.max_attempts {
            let delay_secs = 2i64.saturating_pow(current.attempt.max(0) as u32).min(3600);
            Some(Utc::now() + chrono::Duration::seconds(delay_secs))
        } else {
            None
        };
        let error = error.to_string();

        PublishJob::transition(
            job_id,
            JobStatus::Failed,
            move |j| {
                j.finished_at = Some(Utc::now());
                j.error = Some(error);
                j.retry_at = retry_at;
            },
            &self.db,
        )
        .await
    }

    /// Whether a `failed` job has exhausted its attempt budget.
    pub fn attempts_exhausted(&self, job: &PublishJob) -> bool {
        job.attempt >= self.max_attempts
    }

    /// `failed → dead_letter`, once the attempt budget is exhausted.
    pub async fn dead_letter(&self, job_id: JobId) -> Result<PublishJob> {
        PublishJob::transition(job_id, JobStatus::DeadLetter, |_| {}, &self.db).await
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }
}
