//! Post-publish engagement counters. Store-only: nothing in this crate
//! captures these, since that requires the external API client (out of
//! scope). Exists so the schema and a typed row are ready for the hook
//! named in `Publisher::get_metrics`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::MetricsSnapshotId;
use crate::error::Result;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct MetricsSnapshot {
    #[builder(default = MetricsSnapshotId::new())]
    pub id: MetricsSnapshotId,
    pub external_id: String,
    #[builder(default = Utc::now())]
    pub captured_at: DateTime<Utc>,
    #[builder(default = 0)]
    pub impressions: i64,
    #[builder(default = 0)]
    pub likes: i64,
    #[builder(default = 0)]
    pub replies: i64,
    #[builder(default = 0)]
    pub reposts: i64,
    #[builder(default = 0)]
    pub bookmarks: i64,
    #[builder(default = 0)]
    pub clicks: i64,
    #[builder(default = 0)]
    pub views: i64,
}

const COLUMNS: &str = "id, external_id, captured_at, impressions, likes, replies, reposts, \
    bookmarks, clicks, views";

impl MetricsSnapshot {
    pub async fn insert(&self, db: &sqlx::PgPool) -> Result<Self> {
        let row = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO metrics_snapshots ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(&self.external_id)
        .bind(self.captured_at)
        .bind(self.impressions)
        .bind(self.likes)
        .bind(self.replies)
        .bind(self.reposts)
        .bind(self.bookmarks)
        .bind(self.clicks)
        .bind(self.views)
        .fetch_one(db)
        .await?;
        Ok(row)
    }

    pub async fn latest_for_external_id(
        external_id: &str,
        db: &sqlx::PgPool,
    ) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM metrics_snapshots WHERE external_id = $1 ORDER BY captured_at DESC LIMIT 1"
        ))
        .bind(external_id)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }
}
