//! Fixed (non-templated) posts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::PostId;
use crate::error::Result;
use crate::kernel::jobs::PublishJob;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Post {
    #[builder(default = PostId::new())]
    pub id: PostId,
    pub text: String,
    #[builder(default, setter(strip_option))]
    pub media_refs: Option<serde_json::Value>,
    #[builder(default = false)]
    pub deleted: bool,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub async fn find_by_id(id: PostId, db: &sqlx::PgPool) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(
            "SELECT id, text, media_refs, deleted, created_at, updated_at FROM posts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    pub async fn insert(&self, db: &sqlx::PgPool) -> Result<Self> {
        let row = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO posts (id, text, media_refs, deleted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, text, media_refs, deleted, created_at, updated_at
            "#,
        )
        .bind(self.id)
        .bind(&self.text)
        .bind(&self.media_refs)
        .bind(self.deleted)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(db)
        .await?;
        Ok(row)
    }

    /// Soft-delete and cancel every non-terminal job of every schedule bound
    /// to this post.
    pub async fn soft_delete(id: PostId, db: &sqlx::PgPool) -> Result<u64> {
        sqlx::query("UPDATE posts SET deleted = true, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;

        let schedule_ids: Vec<crate::common::ScheduleId> =
            sqlx::query_scalar("SELECT id FROM schedules WHERE post_id = $1")
                .bind(id)
                .fetch_all(db)
                .await?;

        PublishJob::cancel_non_terminal_for_schedules(&schedule_ids, db).await
    }
}
