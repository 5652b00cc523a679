//! `PublishJob` model and its status transition table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::{JobId, PostVariantId, ScheduleId};
use crate::error::{Result, SchedulerError};
use crate::kernel::policy::SelectionPolicy;

/// `planned → enqueued | cancelled`
/// `enqueued → running | cancelled`
/// `running → succeeded | failed`
/// `failed → running | dead_letter`
/// `succeeded, dead_letter, cancelled`: terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Planned,
    Enqueued,
    Running,
    Succeeded,
    Failed,
    DeadLetter,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::DeadLetter | JobStatus::Cancelled
        )
    }

    /// Validates an edge against the transition table. `planned → running`
    /// is accepted as an extension covering the crash-recovery path where
    /// the enqueue-side transition never landed (see worker runtime).
    pub fn validate_transition(self, to: JobStatus) -> Result<()> {
        let valid = matches!(
            (self, to),
            (JobStatus::Planned, JobStatus::Enqueued)
                | (JobStatus::Planned, JobStatus::Cancelled)
                | (JobStatus::Planned, JobStatus::Running)
                | (JobStatus::Enqueued, JobStatus::Running)
                | (JobStatus::Enqueued, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Failed, JobStatus::Running)
                | (JobStatus::Failed, JobStatus::DeadLetter)
        );
        if valid {
            Ok(())
        } else {
            Err(SchedulerError::InvalidTransition { from: self, to })
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct PublishJob {
    #[builder(default = JobId::new())]
    pub id: JobId,
    pub schedule_id: ScheduleId,
    pub planned_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub enqueued_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub finished_at: Option<DateTime<Utc>>,
    #[builder(default)]
    pub status: JobStatus,
    #[builder(default = 0)]
    pub attempt: i32,
    #[builder(default, setter(strip_option))]
    pub error: Option<String>,
    /// Earliest instant this job (currently `failed`) may be reclaimed for
    /// retry. Implementation detail backing the exponential-backoff retry
    /// described for the worker runtime; not itself a distinct spec field.
    #[builder(default, setter(strip_option))]
    pub retry_at: Option<DateTime<Utc>>,
    pub dedupe_key: String,
    #[builder(default, setter(strip_option))]
    pub variant_id: Option<PostVariantId>,
    #[builder(default, setter(strip_option))]
    pub selection_policy: Option<SelectionPolicy>,
    #[builder(default = 0)]
    pub selection_seed: i64,
    #[builder(default, setter(strip_option))]
    pub selected_at: Option<DateTime<Utc>>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl PublishJob {
    pub fn dedupe_key_for(schedule_id: ScheduleId, planned_at: DateTime<Utc>) -> String {
        format!(
            "{}:{}",
            schedule_id,
            planned_at.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

const COLUMNS: &str = "id, schedule_id, planned_at, enqueued_at, started_at, finished_at, \
    status, attempt, error, retry_at, dedupe_key, variant_id, selection_policy, selection_seed, \
    selected_at, created_at, updated_at";

impl PublishJob {
    pub async fn find_by_id(id: JobId, db: &sqlx::PgPool) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM publish_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    /// Inserts, or returns `None` if `(schedule_id, planned_at)` already has
    /// a row; the fire is already materialized. Generic over the executor
    /// so the scheduler tick can run this inside its batch transaction
    /// alongside the schedule advance, while callers with no surrounding
    /// transaction can just pass the pool.
    pub async fn insert<'e, E>(&self, executor: E) -> Result<Option<Self>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let row = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO publish_jobs ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (schedule_id, planned_at) DO NOTHING
            RETURNING {COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(self.schedule_id)
        .bind(self.planned_at)
        .bind(self.enqueued_at)
        .bind(self.started_at)
        .bind(self.finished_at)
        .bind(self.status)
        .bind(self.attempt)
        .bind(&self.error)
        .bind(self.retry_at)
        .bind(&self.dedupe_key)
        .bind(self.variant_id)
        .bind(self.selection_policy)
        .bind(self.selection_seed)
        .bind(self.selected_at)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// Atomically validate and apply a status transition, locking the row
    /// first so concurrent workers/sweepers/cancellations cannot race.
    pub async fn transition(
        id: JobId,
        to: JobStatus,
        update: impl FnOnce(&mut Self),
        db: &sqlx::PgPool,
    ) -> Result<Self> {
        let mut tx = db.begin().await?;

        let mut job = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM publish_jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        job.status.validate_transition(to)?;
        job.status = to;
        update(&mut job);
        job.updated_at = Utc::now();

        let saved = sqlx::query_as::<_, Self>(&format!(
            r#"
            UPDATE publish_jobs SET
                enqueued_at = $1, started_at = $2, finished_at = $3, status = $4,
                attempt = $5, error = $6, retry_at = $7, variant_id = $8, selection_policy = $9,
                selection_seed = $10, selected_at = $11, updated_at = $12
            WHERE id = $13
            RETURNING {COLUMNS}
            "#
        ))
        .bind(job.enqueued_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.status)
        .bind(job.attempt)
        .bind(&job.error)
        .bind(job.retry_at)
        .bind(job.variant_id)
        .bind(job.selection_policy)
        .bind(job.selection_seed)
        .bind(job.selected_at)
        .bind(job.updated_at)
        .bind(job.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(saved)
    }

    /// Cancel every non-terminal job for the given schedule ids (soft-delete cascade).
    pub async fn cancel_non_terminal_for_schedules(
        schedule_ids: &[ScheduleId],
        db: &sqlx::PgPool,
    ) -> Result<u64> {
        let ids: Vec<uuid::Uuid> = schedule_ids.iter().map(|s| s.into_uuid()).collect();
        let result = sqlx::query(
            r#"
            UPDATE publish_jobs
            SET status = 'cancelled', finished_at = NOW(), updated_at = NOW()
            WHERE schedule_id = ANY($1)
              AND status NOT IN ('succeeded', 'dead_letter', 'cancelled')
            "#,
        )
        .bind(&ids)
        .execute(db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Count of jobs per status (the `job_statistics` supplement).
    pub async fn statistics(db: &sqlx::PgPool) -> Result<Vec<(JobStatus, i64)>> {
        let rows: Vec<(JobStatus, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM publish_jobs GROUP BY status",
        )
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    /// Count of jobs stuck `running` past `timeout`, a health signal rather than a
    /// claim used by the sweeper (which re-enqueues from `enqueued`, not
    /// `running`).
    pub async fn count_stuck_running(timeout: chrono::Duration, db: &sqlx::PgPool) -> Result<i64> {
        let cutoff = chrono::Utc::now() - timeout;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM publish_jobs WHERE status = 'running' AND started_at < $1",
        )
        .bind(cutoff)
        .fetch_one(db)
        .await?;
        Ok(count)
    }

    /// Jobs stuck `enqueued` for longer than `stale_after`, whose
    /// `enqueued_at`/`updated_at` haven't moved within `cooldown`; candidates
    /// for the recovery sweeper's orphan scan.
    pub async fn find_orphaned_enqueued(
        stale_after: chrono::Duration,
        cooldown: chrono::Duration,
        db: &sqlx::PgPool,
    ) -> Result<Vec<JobId>> {
        let now = Utc::now();
        let cutoff = now - stale_after;
        let cooldown_cutoff = now - cooldown;
        let ids: Vec<JobId> = sqlx::query_scalar(
            r#"
            SELECT id FROM publish_jobs
            WHERE status = 'enqueued'
              AND enqueued_at < $1
              AND started_at IS NULL
              AND updated_at < $2
            "#,
        )
        .bind(cutoff)
        .bind(cooldown_cutoff)
        .fetch_all(db)
        .await?;
        Ok(ids)
    }

    /// Jobs still `planned` whose fire time has already passed, meaning the
    /// tick's own enqueue step never landed.
    pub async fn find_due_planned(db: &sqlx::PgPool) -> Result<Vec<JobId>> {
        let ids: Vec<JobId> = sqlx::query_scalar(
            "SELECT id FROM publish_jobs WHERE status = 'planned' AND planned_at <= NOW()",
        )
        .fetch_all(db)
        .await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planned_can_enqueue_or_cancel() {
        assert!(JobStatus::Planned.validate_transition(JobStatus::Enqueued).is_ok());
        assert!(JobStatus::Planned.validate_transition(JobStatus::Cancelled).is_ok());
    }

    #[test]
    fn planned_can_jump_straight_to_running_for_crash_recovery() {
        assert!(JobStatus::Planned.validate_transition(JobStatus::Running).is_ok());
    }

    #[test]
    fn enqueued_can_run_or_cancel() {
        assert!(JobStatus::Enqueued.validate_transition(JobStatus::Running).is_ok());
        assert!(JobStatus::Enqueued.validate_transition(JobStatus::Cancelled).is_ok());
    }

    #[test]
    fn running_can_succeed_or_fail() {
        assert!(JobStatus::Running.validate_transition(JobStatus::Succeeded).is_ok());
        assert!(JobStatus::Running.validate_transition(JobStatus::Failed).is_ok());
    }

    #[test]
    fn failed_can_retry_or_dead_letter() {
        assert!(JobStatus::Failed.validate_transition(JobStatus::Running).is_ok());
        assert!(JobStatus::Failed.validate_transition(JobStatus::DeadLetter).is_ok());
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for terminal in [JobStatus::Succeeded, JobStatus::DeadLetter, JobStatus::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(terminal.validate_transition(JobStatus::Running).is_err());
        }
    }

    #[test]
    fn invalid_edges_are_rejected() {
        assert!(JobStatus::Enqueued.validate_transition(JobStatus::Succeeded).is_err());
        assert!(JobStatus::Planned.validate_transition(JobStatus::Failed).is_err());
        assert!(JobStatus::Planned.validate_transition(JobStatus::Succeeded).is_err());
    }

    #[test]
    fn dedupe_key_is_schedule_and_second_precision_instant() {
        let schedule_id = ScheduleId::new();
        let t = DateTime::parse_from_rfc3339("2030-06-01T00:00:00.500Z")
            .unwrap()
            .with_timezone(&Utc);
        let key = PublishJob::dedupe_key_for(schedule_id, t);
        assert_eq!(key, format!("{}:2030-06-01T00:00:00Z", schedule_id));
    }
}
