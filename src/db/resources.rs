//! Resource, resource-connection, gateway-group and gateway persistence.

use crate::db::Database;
use crate::error::DbError;
use meridian_proto::resource::{Filter, IpStack, Resource, ResourceAddress, ResourceKind};
use meridian_proto::{AccountId, GatewayGroupId, GatewayId, ResourceId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResourceRow {
    pub id: uuid::Uuid,
    pub persistent_id: uuid::Uuid,
    pub account_id: uuid::Uuid,
    pub name: String,
    pub address: Option<String>,
    pub kind: String,
    pub ip_stack: Option<String>,
    pub filters: serde_json::Value,
}

impl ResourceRow {
    pub fn into_domain(self, gateway_groups: Vec<GatewayGroupId>) -> Option<Resource> {
        let kind = match self.kind.as_str() {
            "dns" => ResourceKind::Dns,
            "ip" => ResourceKind::Ip,
            "cidr" => ResourceKind::Cidr,
            "internet" => ResourceKind::Internet,
            _ => return None,
        };
        let ip_stack = self.ip_stack.as_deref().and_then(|s| match s {
            "ipv4_only" => Some(IpStack::Ipv4Only),
            "ipv6_only" => Some(IpStack::Ipv6Only),
            "dual" => Some(IpStack::Dual),
            _ => None,
        });
        let filters: Vec<Filter> = serde_json::from_value(self.filters).unwrap_or_default();
        let address = ResourceAddress { kind, address: self.address, ip_stack, filters };
        let address = match address.validated() {
            Ok(address) => address,
            Err(error) => {
                tracing::warn!(resource_id = %self.id, %error, "resource address failed validation, dropping from cache");
                return None;
            }
        };
        Some(Resource {
            id: ResourceId(self.id),
            persistent_id: ResourceId(self.persistent_id),
            name: self.name,
            address,
            gateway_groups,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GatewayRow {
    pub id: uuid::Uuid,
    pub account_id: uuid::Uuid,
    pub gateway_group_id: uuid::Uuid,
    pub public_key: String,
    pub ipv4_address: Option<String>,
    pub ipv6_address: Option<String>,
    pub last_seen_remote_ip: Option<String>,
    pub last_seen_version: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub struct ResourceRepository<'a> {
    db: &'a Database,
}

impl<'a> ResourceRepository<'a> {
    pub(super) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Hydrate a resource by id from the replica.
    pub async fn find(&self, id: ResourceId) -> Result<Option<Resource>, DbError> {
        let row = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.db.replica())
            .await?;
        let Some(row) = row else { return Ok(None) };
        let groups = self.gateway_groups_for(id).await?;
        Ok(row.into_domain(groups))
    }

    async fn gateway_groups_for(&self, resource_id: ResourceId) -> Result<Vec<GatewayGroupId>, DbError> {
        let ids: Vec<uuid::Uuid> = sqlx::query_scalar(
            "SELECT gateway_group_id FROM resource_connections WHERE resource_id = $1",
        )
        .bind(resource_id.0)
        .fetch_all(self.db.replica())
        .await?;
        Ok(ids.into_iter().map(GatewayGroupId).collect())
    }

    /// All resources reachable by a group's memberships, for cache
    /// hydration: joins `policies` (group -> resource) filtered to
    /// non-disabled, non-deleted policies.
    pub async fn connectable_for_group(&self, account_id: AccountId, group_id: meridian_proto::GroupId) -> Result<Vec<Resource>, DbError> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            "SELECT r.* FROM resources r
             JOIN policies p ON p.resource_id = r.id
             WHERE p.account_id = $1 AND p.actor_group_id = $2
               AND p.disabled_at IS NULL AND p.deleted_at IS NULL",
        )
        .bind(account_id.0)
        .bind(group_id.0)
        .fetch_all(self.db.replica())
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id = ResourceId(row.id);
            let groups = self.gateway_groups_for(id).await?;
            if let Some(resource) = row.into_domain(groups) {
                out.push(resource);
            }
        }
        Ok(out)
    }
}

pub struct GatewayRepository<'a> {
    db: &'a Database,
}

impl<'a> GatewayRepository<'a> {
    pub(super) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn find(&self, id: GatewayId) -> Result<Option<GatewayRow>, DbError> {
        sqlx::query_as::<_, GatewayRow>("SELECT * FROM gateways WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.db.primary())
            .await
            .map_err(DbError::from)
    }

    /// Every gateway registered to a gateway group, for routing a flow
    /// authorization to one of the group's currently-connected gateways.
    pub async fn in_group(&self, gateway_group_id: GatewayGroupId) -> Result<Vec<GatewayRow>, DbError> {
        sqlx::query_as::<_, GatewayRow>("SELECT * FROM gateways WHERE gateway_group_id = $1")
            .bind(gateway_group_id.0)
            .fetch_all(self.db.primary())
            .await
            .map_err(DbError::from)
    }

    pub async fn touch_last_seen(&self, id: GatewayId, remote_ip: &str, version: &str) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE gateways SET last_seen_remote_ip = $2, last_seen_version = $3 WHERE id = $1",
        )
        .bind(id.0)
        .bind(remote_ip)
        .bind(version)
        .execute(self.db.primary())
        .await?;
        Ok(())
    }
}
