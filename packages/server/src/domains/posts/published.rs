//! Record of a successful publish. Idempotent on `external_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::{PostId, PostVariantId, PublishedPostId};
use crate::error::Result;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct PublishedPost {
    #[builder(default = PublishedPostId::new())]
    pub id: PublishedPostId,
    #[builder(default, setter(strip_option))]
    pub post_id: Option<PostId>,
    #[builder(default, setter(strip_option))]
    pub variant_id: Option<PostVariantId>,
    pub external_id: String,
    #[builder(default = Utc::now())]
    pub published_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub url: Option<String>,
}

const COLUMNS: &str = "id, post_id, variant_id, external_id, published_at, url";

impl PublishedPost {
    pub async fn find_by_external_id(
        external_id: &str,
        db: &sqlx::PgPool,
    ) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM published_posts WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    /// Insert, or return the existing row if `external_id` was already
    /// recorded by a previous (retried) attempt.
    pub async fn find_or_create(&self, db: &sqlx::PgPool) -> Result<Self> {
        if let Some(existing) = Self::find_by_external_id(&self.external_id, db).await? {
            return Ok(existing);
        }
        let row = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO published_posts ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (external_id) DO UPDATE SET external_id = EXCLUDED.external_id
            RETURNING {COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(self.post_id)
        .bind(self.variant_id)
        .bind(&self.external_id)
        .bind(self.published_at)
        .bind(&self.url)
        .fetch_one(db)
        .await?;
        Ok(row)
    }

    /// Most recent `limit` published texts, joined through post/variant, for
    /// the content-safety duplicate check.
    pub async fn recent_texts(limit: i64, db: &sqlx::PgPool) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT COALESCE(v.text, p.text) AS text
            FROM published_posts pp
            LEFT JOIN post_variants v ON v.id = pp.variant_id
            LEFT JOIN posts p ON p.id = pp.post_id
            ORDER BY pp.published_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(db)
        .await?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }
}
