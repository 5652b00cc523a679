//! A schedule: exactly one content source, a firing rule, and the cursor
//! state the resolver and variant selector need to advance it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::{PostId, PostTemplateId, ScheduleId};
use crate::error::{Result, SchedulerError};
use crate::kernel::policy::{NoRepeatScope, SelectionPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "schedule_kind", rename_all = "snake_case")]
pub enum ScheduleKind {
    OneShot,
    Cron,
    Rrule,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Schedule {
    #[builder(default = ScheduleId::new())]
    pub id: ScheduleId,
    #[builder(default, setter(strip_option))]
    pub post_id: Option<PostId>,
    #[builder(default, setter(strip_option))]
    pub template_id: Option<PostTemplateId>,
    pub kind: ScheduleKind,
    pub schedule_spec: String,
    pub timezone: String,
    #[builder(default, setter(strip_option))]
    pub next_run_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub last_run_at: Option<DateTime<Utc>>,
    #[builder(default = true)]
    pub enabled: bool,
    #[builder(default, setter(strip_option))]
    pub selection_policy: Option<SelectionPolicy>,
    #[builder(default = 0)]
    pub no_repeat_window: i32,
    #[builder(default)]
    pub no_repeat_scope: NoRepeatScope,
    #[builder(default, setter(strip_option))]
    pub last_variant_pos: Option<i32>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, post_id, template_id, kind, schedule_spec, timezone, next_run_at, \
    last_run_at, enabled, selection_policy, no_repeat_window, no_repeat_scope, last_variant_pos, \
    created_at, updated_at";

impl Schedule {
    /// Exactly one of `{post_id, template_id}` must be set.
    pub fn validate(&self) -> Result<()> {
        if self.post_id.is_some() == self.template_id.is_some() {
            return Err(SchedulerError::Validation(
                "schedule must set exactly one of post_id or template_id".into(),
            ));
        }
        if self.no_repeat_window < 0 {
            return Err(SchedulerError::Validation(
                "no_repeat_window must be non-negative".into(),
            ));
        }
        Ok(())
    }

    pub async fn find_by_id(id: ScheduleId, db: &sqlx::PgPool) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM schedules WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    pub async fn list(db: &sqlx::PgPool) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM schedules ORDER BY created_at ASC"
        ))
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn insert(&self, db: &sqlx::PgPool) -> Result<Self> {
        self.validate()?;
        let row = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO schedules ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(self.post_id)
        .bind(self.template_id)
        .bind(self.kind)
        .bind(&self.schedule_spec)
        .bind(&self.timezone)
        .bind(self.next_run_at)
        .bind(self.last_run_at)
        .bind(self.enabled)
        .bind(self.selection_policy)
        .bind(self.no_repeat_window)
        .bind(self.no_repeat_scope)
        .bind(self.last_variant_pos)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(db)
        .await?;
        Ok(row)
    }

    /// Schedules enabled with `next_run_at` unresolved: the bootstrap target.
    pub async fn find_unresolved(db: &sqlx::PgPool) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM schedules WHERE enabled = true AND next_run_at IS NULL"
        ))
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    /// Claims schedules due to fire, `FOR UPDATE SKIP LOCKED` so concurrent
    /// tick replicas partition work without blocking each other. Must be
    /// called inside an open transaction; the caller commits.
    pub async fn claim_due(
        now: DateTime<Utc>,
        limit: i64,
        tx: &mut sqlx::PgConnection,
    ) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {COLUMNS} FROM schedules
            WHERE next_run_at <= $1 AND enabled = true
            ORDER BY next_run_at
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;
        Ok(rows)
    }

    /// Advance this schedule after firing: `last_run_at = planned_at`, then
    /// `next_run_at = next` (or disable if `next` is `None`). Also persists
    /// `last_variant_pos` when the round-robin policy advanced it.
    pub async fn advance(
        id: ScheduleId,
        planned_at: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
        new_variant_pos: Option<i32>,
        tx: &mut sqlx::PgConnection,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE schedules SET
                last_run_at = $2,
                next_run_at = $3,
                enabled = CASE WHEN $3 IS NULL THEN false ELSE enabled END,
                last_variant_pos = COALESCE($4, last_variant_pos),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(planned_at)
        .bind(next)
        .bind(new_variant_pos)
        .execute(&mut *tx)
        .await?;
        Ok(())
    }

    /// Count of enabled schedules overdue by more than `grace`, a health
    /// signal rather than a query used by the tick itself.
    pub async fn count_overdue(grace: chrono::Duration, db: &sqlx::PgPool) -> Result<i64> {
        let cutoff = Utc::now() - grace;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM schedules WHERE enabled = true AND next_run_at < $1",
        )
        .bind(cutoff)
        .fetch_one(db)
        .await?;
        Ok(count)
    }

    pub async fn disable(id: ScheduleId, db: &sqlx::PgPool) -> Result<()> {
        sqlx::query("UPDATE schedules SET enabled = false, next_run_at = NULL, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_of_post_or_template_required() {
        let neither = Schedule::builder()
            .kind(ScheduleKind::OneShot)
            .schedule_spec("2030-01-01T00:00:00Z")
            .timezone("UTC")
            .build();
        assert!(neither.validate().is_err());

        let both = Schedule::builder()
            .post_id(PostId::new())
            .template_id(PostTemplateId::new())
            .kind(ScheduleKind::OneShot)
            .schedule_spec("2030-01-01T00:00:00Z")
            .timezone("UTC")
            .build();
        assert!(both.validate().is_err());

        let one = Schedule::builder()
            .post_id(PostId::new())
            .kind(ScheduleKind::OneShot)
            .schedule_spec("2030-01-01T00:00:00Z")
            .timezone("UTC")
            .build();
        assert!(one.validate().is_ok());
    }
}
