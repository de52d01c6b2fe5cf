//! Account (tenant) persistence.

use crate::db::Database;
use crate::error::DbError;
use meridian_proto::AccountId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccountRow {
    pub id: uuid::Uuid,
    pub slug: String,
    pub features: serde_json::Value,
    pub limits: serde_json::Value,
    pub config: serde_json::Value,
    pub disabled_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct AccountRepository<'a> {
    db: &'a Database,
}

impl<'a> AccountRepository<'a> {
    pub(super) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn find(&self, id: AccountId) -> Result<Option<AccountRow>, DbError> {
        sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.db.primary())
            .await
            .map_err(DbError::from)
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<AccountRow>, DbError> {
        sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE slug = $1")
            .bind(slug)
            .fetch_optional(self.db.primary())
            .await
            .map_err(DbError::from)
    }

    pub async fn is_disabled(&self, id: AccountId) -> Result<bool, DbError> {
        let row = self.find(id).await?.ok_or(DbError::AccountNotFound(id.0))?;
        Ok(row.disabled_at.is_some())
    }
}
