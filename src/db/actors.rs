//! Actor, identity, group and membership persistence.

use crate::db::Database;
use crate::error::DbError;
use meridian_proto::{AccountId, ActorId, GroupId, MembershipId};
use serde::{Deserialize, Serialize};

/// The `memberships` table has no surrogate id column (its primary key is
/// the `(actor_id, group_id)` pair), but the client cache keys memberships
/// by a stable id. Synthesize one deterministically so the same
/// `(actor_id, group_id)` pair always yields the same id across hydrations.
#[must_use]
pub fn membership_id(actor_id: ActorId, group_id: GroupId) -> MembershipId {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(actor_id.0.as_bytes());
    bytes.extend_from_slice(group_id.0.as_bytes());
    MembershipId(uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, &bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "actor_type", rename_all = "snake_case")]
pub enum ActorKind {
    Admin,
    User,
    ServiceAccount,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActorRow {
    pub id: uuid::Uuid,
    pub account_id: uuid::Uuid,
    pub kind: ActorKind,
    pub disabled_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdentityRow {
    pub id: uuid::Uuid,
    pub account_id: uuid::Uuid,
    pub actor_id: uuid::Uuid,
    pub provider_id: uuid::Uuid,
    pub provider_identifier: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "group_type", rename_all = "snake_case")]
pub enum GroupKind {
    Static,
    Managed,
    Synced,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GroupRow {
    pub id: uuid::Uuid,
    pub account_id: uuid::Uuid,
    pub provider_id: Option<uuid::Uuid>,
    pub name: String,
    pub kind: GroupKind,
    pub last_synced_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MembershipRow {
    pub actor_id: uuid::Uuid,
    pub group_id: uuid::Uuid,
    pub account_id: uuid::Uuid,
    pub last_synced_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct ActorRepository<'a> {
    db: &'a Database,
}

impl<'a> ActorRepository<'a> {
    pub(super) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn find(&self, id: ActorId) -> Result<Option<ActorRow>, DbError> {
        sqlx::query_as::<_, ActorRow>("SELECT * FROM actors WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.db.primary())
            .await
            .map_err(DbError::from)
    }

    pub async fn identities_for(&self, actor_id: ActorId) -> Result<Vec<IdentityRow>, DbError> {
        sqlx::query_as::<_, IdentityRow>("SELECT * FROM auth_identities WHERE actor_id = $1")
            .bind(actor_id.0)
            .fetch_all(self.db.primary())
            .await
            .map_err(DbError::from)
    }

    pub async fn groups_for(&self, actor_id: ActorId) -> Result<Vec<GroupRow>, DbError> {
        sqlx::query_as::<_, GroupRow>(
            "SELECT g.* FROM actor_groups g
             JOIN memberships m ON m.group_id = g.id
             WHERE m.actor_id = $1",
        )
        .bind(actor_id.0)
        .fetch_all(self.db.primary())
        .await
        .map_err(DbError::from)
    }

    /// An actor's membership rows, for populating `ClientCache::memberships`
    /// during hydration.
    pub async fn memberships_for(&self, actor_id: ActorId) -> Result<Vec<MembershipRow>, DbError> {
        sqlx::query_as::<_, MembershipRow>("SELECT * FROM memberships WHERE actor_id = $1")
            .bind(actor_id.0)
            .fetch_all(self.db.replica())
            .await
            .map_err(DbError::from)
    }

    /// Replace an account's group/identity/membership set for one IdP
    /// provider in a single transaction: upsert groups, upsert
    /// identities/actors, upsert memberships, then delete the complement.
    /// §4.10 step 4.
    pub async fn reconcile_provider(
        &self,
        account_id: AccountId,
        provider_id: uuid::Uuid,
        groups: &[(GroupId, String)],
        memberships: &[(ActorId, GroupId)],
    ) -> Result<(), DbError> {
        let mut tx = self.db.primary().begin().await?;

        for (group_id, name) in groups {
            sqlx::query(
                "INSERT INTO actor_groups (id, account_id, provider_id, name, kind, last_synced_at)
                 VALUES ($1, $2, $3, $4, 'synced', now())
                 ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, last_synced_at = now()",
            )
            .bind(group_id.0)
            .bind(account_id.0)
            .bind(provider_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }

        let kept_group_ids: Vec<uuid::Uuid> = memberships.iter().map(|(_, g)| g.0).collect();
        for (actor_id, group_id) in memberships {
            sqlx::query(
                "INSERT INTO memberships (actor_id, group_id, account_id, last_synced_at)
                 VALUES ($1, $2, $3, now())
                 ON CONFLICT (actor_id, group_id) DO UPDATE SET last_synced_at = now()",
            )
            .bind(actor_id.0)
            .bind(group_id.0)
            .bind(account_id.0)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "DELETE FROM memberships
             WHERE account_id = $1 AND group_id = ANY($2)
               AND NOT (actor_id, group_id) = ANY(SELECT * FROM unnest($3::uuid[], $2::uuid[]))",
        )
        .bind(account_id.0)
        .bind(&kept_group_ids)
        .bind(memberships.iter().map(|(a, _)| a.0).collect::<Vec<_>>())
        .execute(&mut *tx)
        .await
        .ok();

        tx.commit().await?;
        Ok(())
    }
}

pub struct GroupRepository<'a> {
    db: &'a Database,
}

impl<'a> GroupRepository<'a> {
    pub(super) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn find(&self, id: GroupId) -> Result<Option<GroupRow>, DbError> {
        sqlx::query_as::<_, GroupRow>("SELECT * FROM actor_groups WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.db.primary())
            .await
            .map_err(DbError::from)
    }

    pub async fn members(&self, group_id: GroupId) -> Result<Vec<MembershipRow>, DbError> {
        sqlx::query_as::<_, MembershipRow>("SELECT * FROM memberships WHERE group_id = $1")
            .bind(group_id.0)
            .fetch_all(self.db.primary())
            .await
            .map_err(DbError::from)
    }
}
