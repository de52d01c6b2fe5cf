//! Policy and policy-authorization persistence.

use crate::db::Database;
use crate::error::DbError;
use meridian_proto::condition::Condition;
use meridian_proto::{AccountId, ClientId, GatewayId, GroupId, PolicyAuthorizationId, PolicyId, ResourceId};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PolicyRow {
    pub id: uuid::Uuid,
    pub persistent_id: uuid::Uuid,
    pub account_id: uuid::Uuid,
    pub actor_group_id: uuid::Uuid,
    pub resource_id: uuid::Uuid,
    pub description: Option<String>,
    pub conditions: serde_json::Value,
    pub disabled_at: Option<chrono::DateTime<chrono::Utc>>,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl PolicyRow {
    pub fn conditions(&self) -> Vec<Condition> {
        serde_json::from_value(self.conditions.clone()).unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        self.disabled_at.is_none() && self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PolicyAuthorizationRow {
    pub id: uuid::Uuid,
    pub policy_id: uuid::Uuid,
    pub gateway_id: uuid::Uuid,
    pub client_id: uuid::Uuid,
    pub resource_id: uuid::Uuid,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub preshared_key: String,
}

pub struct PolicyRepository<'a> {
    db: &'a Database,
}

impl<'a> PolicyRepository<'a> {
    pub(super) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Every active policy bound to `group_id`, across all resources, for
    /// cache hydration.
    pub async fn active_for_group(&self, account_id: AccountId, group_id: GroupId) -> Result<Vec<PolicyRow>, DbError> {
        sqlx::query_as::<_, PolicyRow>(
            "SELECT * FROM policies
             WHERE account_id = $1 AND actor_group_id = $2
               AND disabled_at IS NULL AND deleted_at IS NULL",
        )
        .bind(account_id.0)
        .bind(group_id.0)
        .fetch_all(self.db.replica())
        .await
        .map_err(DbError::from)
    }

    /// Active policies binding `group_id` to `resource_id`, used to find
    /// every candidate for the longest-conforming-policy selection.
    pub async fn active_for(&self, account_id: AccountId, group_id: GroupId, resource_id: ResourceId) -> Result<Vec<PolicyRow>, DbError> {
        sqlx::query_as::<_, PolicyRow>(
            "SELECT * FROM policies
             WHERE account_id = $1 AND actor_group_id = $2 AND resource_id = $3
               AND disabled_at IS NULL AND deleted_at IS NULL",
        )
        .bind(account_id.0)
        .bind(group_id.0)
        .bind(resource_id.0)
        .fetch_all(self.db.replica())
        .await
        .map_err(DbError::from)
    }

    pub async fn put_authorization(
        &self,
        id: PolicyAuthorizationId,
        policy_id: PolicyId,
        gateway_id: GatewayId,
        client_id: ClientId,
        resource_id: ResourceId,
        expires_at: chrono::DateTime<chrono::Utc>,
        preshared_key: &str,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO policy_authorizations (id, policy_id, gateway_id, client_id, resource_id, expires_at, preshared_key)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(id.0)
        .bind(policy_id.0)
        .bind(gateway_id.0)
        .bind(client_id.0)
        .bind(resource_id.0)
        .bind(expires_at)
        .bind(preshared_key)
        .execute(self.db.primary())
        .await?;
        Ok(())
    }

    pub async fn delete_authorization(&self, id: PolicyAuthorizationId) -> Result<(), DbError> {
        sqlx::query("DELETE FROM policy_authorizations WHERE id = $1")
            .bind(id.0)
            .execute(self.db.primary())
            .await?;
        Ok(())
    }

    /// Other non-expired authorizations for the same (client, resource,
    /// gateway) — used by `reauthorize_deleted_policy_authorization`.
    pub async fn other_authorizations(
        &self,
        client_id: ClientId,
        resource_id: ResourceId,
        gateway_id: GatewayId,
        exclude: PolicyAuthorizationId,
    ) -> Result<Vec<PolicyAuthorizationRow>, DbError> {
        sqlx::query_as::<_, PolicyAuthorizationRow>(
            "SELECT * FROM policy_authorizations
             WHERE client_id = $1 AND resource_id = $2 AND gateway_id = $3
               AND id != $4 AND expires_at > now()",
        )
        .bind(client_id.0)
        .bind(resource_id.0)
        .bind(gateway_id.0)
        .bind(exclude.0)
        .fetch_all(self.db.replica())
        .await
        .map_err(DbError::from)
    }
}
