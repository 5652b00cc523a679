//! The scheduler tick: claims due schedules, materializes jobs, advances
//! schedules, and enqueues. Invoked by an external periodic trigger
//! (`~60s`, see `bin/scheduler.rs`).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::domains::posts::VariantSelectionHistory;
use crate::domains::schedules::{resolver, RRuleCache, Schedule};
use crate::domains::variants;
use crate::error::Result;
use crate::kernel::dedupe::{dedupe_key, DedupeStore};

use super::job::PublishJob;
use super::queue::PostgresJobQueue;

const DEDUPE_LOCK_TTL: Duration = Duration::from_secs(2 * 24 * 60 * 60);
const CLAIM_BATCH_SIZE: i64 = 200;

pub struct SchedulerTick {
    db: sqlx::PgPool,
    dedupe: Arc<dyn DedupeStore>,
    queue: PostgresJobQueue,
    rrule_cache: RRuleCache,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub claimed: usize,
    pub materialized: usize,
    pub deduped_or_skipped: usize,
    pub conflicts: usize,
}

impl SchedulerTick {
    pub fn new(db: sqlx::PgPool, dedupe: Arc<dyn DedupeStore>, queue: PostgresJobQueue) -> Self {
        Self {
            db,
            dedupe,
            queue,
            rrule_cache: RRuleCache::default(),
        }
    }

    /// One-time bootstrap: resolves `next_run_at` for enabled schedules that
    /// have never had it set. Without this a freshly-created schedule never
    /// fires, since the tick only *advances* an existing `next_run_at`.
    pub async fn initialize_schedules(&self) -> Result<usize> {
        let now = Utc::now();
        let unresolved = Schedule::find_unresolved(&self.db).await?;
        let mut seeded = 0;
        for schedule in unresolved {
            match resolver::resolve(&schedule, now, &self.rrule_cache) {
                Some(next) => {
                    sqlx::query("UPDATE schedules SET next_run_at = $2, updated_at = NOW() WHERE id = $1")
                        .bind(schedule.id)
                        .bind(next)
                        .execute(&self.db)
                        .await?;
                    seeded += 1;
                }
                None => {
                    Schedule::disable(schedule.id, &self.db).await?;
                }
            }
        }
        Ok(seeded)
    }

    /// Diagnostic-only pass: logs a warning when overdue schedules or jobs
    /// stuck `running` cross a threshold. Mutates nothing.
    pub async fn health_check(&self) -> Result<()> {
        const OVERDUE_GRACE: chrono::Duration = chrono::Duration::minutes(5);
        const RUNNING_TIMEOUT: chrono::Duration = chrono::Duration::minutes(10);
        const OVERDUE_THRESHOLD: i64 = 10;
        const STUCK_THRESHOLD: i64 = 5;

        let overdue = Schedule::count_overdue(OVERDUE_GRACE, &self.db).await?;
        let stuck = PublishJob::count_stuck_running(RUNNING_TIMEOUT, &self.db).await?;

        tracing::info!(overdue, stuck, "scheduler health check");
        if overdue > OVERDUE_THRESHOLD {
            tracing::warn!(overdue, "high number of overdue schedules");
        }
        if stuck > STUCK_THRESHOLD {
            tracing::warn!(stuck, "high number of stuck running jobs");
        }
        Ok(())
    }

    pub async fn run(&self) -> Result<TickReport> {
        let now = Utc::now();
        let mut report = TickReport::default();

        let mut tx = self.db.begin().await?;
        let due = Schedule::claim_due(now, CLAIM_BATCH_SIZE, &mut tx).await?;
        report.claimed = due.len();

        let mut enqueue_after_commit = Vec::new();

        for schedule in due {
            let mut savepoint = match tx.begin().await {
                Ok(sp) => sp,
                Err(e) => {
                    tracing::warn!(schedule_id = %schedule.id, error = %e, "failed to open savepoint");
                    continue;
                }
            };

            match self.process_one(&schedule, now, &mut savepoint).await {
                Ok(Some(job_id)) => {
                    if let Err(e) = savepoint.commit().await {
                        tracing::warn!(schedule_id = %schedule.id, error = %e, "savepoint commit failed");
                    } else {
                        enqueue_after_commit.push(job_id);
                        report.materialized += 1;
                    }
                }
                Ok(None) => {
                    let _ = savepoint.commit().await;
                    report.deduped_or_skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(schedule_id = %schedule.id, error = %e, "tick step failed, skipping schedule this round");
                    report.deduped_or_skipped += 1;
                }
            }
        }

        tx.commit().await?;

        for job_id in enqueue_after_commit {
            if let Err(e) = self.queue.enqueue(job_id).await {
                tracing::warn!(job_id = %job_id, error = %e, "enqueue failed, job stays planned for the sweeper");
            }
        }

        Ok(report)
    }

    /// Forces a single schedule to fire immediately, bypassing the
    /// `next_run_at <= now` claim filter. For manual operator use (`dev
    /// schedule trigger`), not called by the periodic tick itself.
    pub async fn trigger_schedule(
        &self,
        schedule_id: crate::common::ScheduleId,
    ) -> Result<Option<crate::common::JobId>> {
        let now = Utc::now();
        let mut schedule = Schedule::find_by_id(schedule_id, &self.db)
            .await?
            .ok_or_else(|| crate::error::SchedulerError::NotFound {
                what: "schedule",
                id: schedule_id.to_string(),
            })?;

        if schedule.next_run_at.is_none() {
            schedule.next_run_at = resolver::resolve(&schedule, now, &self.rrule_cache);
        }
        if schedule.next_run_at.is_none() {
            return Ok(None);
        }

        let mut tx = self.db.begin().await?;
        let job_id = self.process_one(&schedule, now, &mut tx).await?;
        tx.commit().await?;

        if let Some(id) = job_id {
            if let Err(e) = self.queue.enqueue(id).await {
                tracing::warn!(job_id = %id, error = %e, "enqueue failed after manual trigger");
            }
        }
        Ok(job_id)
    }

    /// Processes one claimed schedule inside its own savepoint. Returns the
    /// new job's id on materialization, `None` if this fire was skipped
    /// (dedupe lock contention, empty variant pool, or already-materialized
    /// via the UNIQUE constraint).
    async fn process_one(
        &self,
        schedule: &Schedule,
        now: chrono::DateTime<Utc>,
        tx: &mut sqlx::PgConnection,
    ) -> Result<Option<crate::common::JobId>> {
        let planned_at = schedule
            .next_run_at
            .expect("claim_due only returns schedules with next_run_at set");

        let lock_key = dedupe_key(&schedule.id.to_string(), &planned_at.format("%Y-%m-%dT%H:%M:%SZ").to_string());
        let acquired = self
            .dedupe
            .acquire(&lock_key, DEDUPE_LOCK_TTL)
            .await
            .unwrap_or(true); // dedupe store down: fail open, UNIQUE constraint is the real guard
        if !acquired {
            return Ok(None);
        }

        let selection = variants::select(schedule, planned_at, &self.db).await?;
        if schedule.template_id.is_some() && selection.variant_id.is_none() {
            tracing::warn!(schedule_id = %schedule.id, "no active variants for template, skipping fire");
            return Ok(None);
        }

        let mut job = PublishJob::builder()
            .schedule_id(schedule.id)
            .planned_at(planned_at)
            .dedupe_key(PublishJob::dedupe_key_for(schedule.id, planned_at))
            .selection_seed(selection.seed)
            .build();
        job.variant_id = selection.variant_id;
        job.selection_policy = schedule.selection_policy;
        job.selected_at = selection.variant_id.map(|_| now);

        let Some(inserted) = job.insert(&mut *tx).await? else {
            // UNIQUE (schedule_id, planned_at) conflict: already materialized.
            return Ok(None);
        };

        if let Some(variant_id) = selection.variant_id {
            let history = VariantSelectionHistory::builder()
                .template_id(schedule.template_id.expect("template_id set when variant chosen"))
                .variant_id(variant_id)
                .schedule_id(schedule.id)
                .job_id(inserted.id)
                .planned_at(planned_at)
                .build();
            history.insert(&mut *tx).await?;
        }

        let mut advancing = schedule.clone();
        advancing.last_run_at = Some(planned_at);
        let next = resolver::resolve(&advancing, now, &self.rrule_cache);

        Schedule::advance(
            schedule.id,
            planned_at,
            next,
            selection.new_last_variant_pos,
            &mut *tx,
        )
        .await?;

        Ok(Some(inserted.id))
    }
}

