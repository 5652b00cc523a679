//! Post templates: named pools of weighted variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::PostTemplateId;
use crate::error::Result;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct PostTemplate {
    #[builder(default = PostTemplateId::new())]
    pub id: PostTemplateId,
    pub name: String,
    #[builder(default, setter(strip_option))]
    pub description: Option<String>,
    #[builder(default = true)]
    pub active: bool,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, name, description, active, created_at, updated_at";

impl PostTemplate {
    pub async fn find_by_id(id: PostTemplateId, db: &sqlx::PgPool) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM post_templates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    pub async fn insert(&self, db: &sqlx::PgPool) -> Result<Self> {
        let row = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO post_templates ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.description)
        .bind(self.active)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(db)
        .await?;
        Ok(row)
    }

    /// Cascade delete: removes the template and its variants (FK `ON DELETE CASCADE`).
    pub async fn delete(id: PostTemplateId, db: &sqlx::PgPool) -> Result<()> {
        sqlx::query("DELETE FROM post_templates WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }
}
