//! Variants: one candidate piece of content under a template.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::{PostTemplateId, PostVariantId};
use crate::error::{Result, SchedulerError};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct PostVariant {
    #[builder(default = PostVariantId::new())]
    pub id: PostVariantId,
    pub template_id: PostTemplateId,
    pub text: String,
    #[builder(default = 1)]
    pub weight: i32,
    #[builder(default = true)]
    pub active: bool,
    #[builder(default, setter(strip_option))]
    pub media_refs: Option<serde_json::Value>,
    #[builder(default, setter(strip_option))]
    pub locale: Option<String>,
    #[builder(default, setter(strip_option))]
    pub tags: Option<serde_json::Value>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, template_id, text, weight, active, media_refs, locale, tags, \
    created_at, updated_at";

impl PostVariant {
    pub fn validate(&self) -> Result<()> {
        if self.text.is_empty() || self.text.chars().count() > 280 {
            return Err(SchedulerError::Validation(
                "variant text must be non-empty and at most 280 characters".into(),
            ));
        }
        if self.weight < 1 {
            return Err(SchedulerError::Validation(
                "variant weight must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub async fn find_by_id(id: PostVariantId, db: &sqlx::PgPool) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM post_variants WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    /// The active pool for a template, ordered by id ascending (round-robin's
    /// stable ordering).
    pub async fn active_pool(
        template_id: PostTemplateId,
        db: &sqlx::PgPool,
    ) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM post_variants WHERE template_id = $1 AND active = true ORDER BY id ASC"
        ))
        .bind(template_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn insert(&self, db: &sqlx::PgPool) -> Result<Self> {
        self.validate()?;
        let row = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO post_variants ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(self.template_id)
        .bind(&self.text)
        .bind(self.weight)
        .bind(self.active)
        .bind(&self.media_refs)
        .bind(&self.locale)
        .bind(&self.tags)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(db)
        .await?;
        Ok(row)
    }
}
