//! Append-only record of every variant selection, backing the no-repeat window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::{JobId, PostTemplateId, PostVariantId, ScheduleId, VariantSelectionHistoryId};
use crate::error::Result;
use crate::kernel::policy::NoRepeatScope;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct VariantSelectionHistory {
    #[builder(default = VariantSelectionHistoryId::new())]
    pub id: VariantSelectionHistoryId,
    pub template_id: PostTemplateId,
    pub variant_id: PostVariantId,
    pub schedule_id: ScheduleId,
    pub job_id: JobId,
    pub planned_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub selected_at: DateTime<Utc>,
}

impl VariantSelectionHistory {
    pub async fn insert(&self, tx: &mut sqlx::PgConnection) -> Result<Self> {
        let row = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO variant_selection_history
                (id, template_id, variant_id, schedule_id, job_id, planned_at, selected_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, template_id, variant_id, schedule_id, job_id, planned_at, selected_at
            "#,
        )
        .bind(self.id)
        .bind(self.template_id)
        .bind(self.variant_id)
        .bind(self.schedule_id)
        .bind(self.job_id)
        .bind(self.planned_at)
        .bind(self.selected_at)
        .fetch_one(&mut *tx)
        .await?;
        Ok(row)
    }

    /// The most recent `window` selected variant ids at or before
    /// `planned_at`, scoped either to a template or a single schedule.
    pub async fn recent_variant_ids(
        scope: NoRepeatScope,
        template_id: PostTemplateId,
        schedule_id: ScheduleId,
        planned_at: DateTime<Utc>,
        window: i64,
        db: &sqlx::PgPool,
    ) -> Result<Vec<PostVariantId>> {
        if window <= 0 {
            return Ok(Vec::new());
        }
        let rows: Vec<(PostVariantId,)> = match scope {
            NoRepeatScope::Template => {
                sqlx::query_as(
                    r#"
                    SELECT variant_id FROM variant_selection_history
                    WHERE template_id = $1 AND selected_at <= $2
                    ORDER BY selected_at DESC
                    LIMIT $3
                    "#,
                )
                .bind(template_id)
                .bind(planned_at)
                .bind(window)
                .fetch_all(db)
                .await?
            }
            NoRepeatScope::Schedule => {
                sqlx::query_as(
                    r#"
                    SELECT variant_id FROM variant_selection_history
                    WHERE schedule_id = $1 AND selected_at <= $2
                    ORDER BY selected_at DESC
                    LIMIT $3
                    "#,
                )
                .bind(schedule_id)
                .bind(planned_at)
                .bind(window)
                .fetch_all(db)
                .await?
            }
        };
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
