//! C5: per-client materialized view of policies, resources and
//! memberships, held for the lifetime of the client channel. Mutated only
//! by the owning session — never shared across sessions.

use crate::condition::{self, EvalOutcome};
use crate::db::Database;
use crate::error::CacheError;
use chrono::{DateTime, Utc};
use meridian_proto::condition::{ClientContext, Condition};
use meridian_proto::resource::{Resource, ResourceView};
use meridian_proto::{AccountId, ActorId, GroupId, PolicyId, ResourceId};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct PolicyEntry {
    pub resource_id: ResourceId,
    pub actor_group_id: GroupId,
    pub conditions: Vec<Condition>,
}

/// Identifying facts about the connected client needed to hydrate and
/// recompute its cache.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub account_id: AccountId,
    pub actor_id: ActorId,
    pub group_ids: Vec<GroupId>,
    pub client_version: Option<(u16, u16)>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientCache {
    pub policies: HashMap<PolicyId, PolicyEntry>,
    pub resources: HashMap<ResourceId, Resource>,
    pub memberships: HashMap<GroupId, meridian_proto::MembershipId>,
    pub connectable_resources: Vec<ResourceView>,
}

/// Outcome of any cache-mutating operation: the resources that became
/// newly connectable, the ids that stopped being connectable, and the
/// refreshed cache.
pub struct Diff {
    pub added_resources: Vec<ResourceView>,
    pub removed_resource_ids: Vec<ResourceId>,
    pub cache: ClientCache,
}

impl ClientCache {
    /// Load every policy/resource reachable through the client's
    /// memberships from the read-replica. Does not itself compute
    /// `connectable_resources` — call `recompute_connectable` after.
    pub async fn hydrate(db: &Database, identity: &ClientIdentity) -> Result<Self, crate::error::DbError> {
        let mut cache = ClientCache::default();
        for &group_id in &identity.group_ids {
            let resources = db.resources().connectable_for_group(identity.account_id, group_id).await?;
            for resource in resources {
                cache.resources.insert(resource.id, resource);
            }
            let policies = db.policies().active_for_group(identity.account_id, group_id).await.unwrap_or_default();
            for row in policies {
                let entry = PolicyEntry {
                    resource_id: ResourceId(row.resource_id),
                    actor_group_id: GroupId(row.actor_group_id),
                    conditions: row.conditions(),
                };
                cache.policies.insert(PolicyId(row.id), entry);
            }
        }

        let memberships = db.actors().memberships_for(identity.actor_id).await.unwrap_or_default();
        for row in memberships {
            let group_id = GroupId(row.group_id);
            cache.memberships.insert(group_id, crate::db::membership_id(identity.actor_id, group_id));
        }

        Ok(cache)
    }

    /// Recompute `connectable_resources` from scratch. A resource is
    /// connectable iff some active, conforming policy binds one of the
    /// client's groups to it, the client's version supports its fields,
    /// and it has at least one gateway group.
    #[must_use]
    pub fn recompute_connectable(mut self, identity: &ClientIdentity, ctx: &ClientContext, subject_expiry: DateTime<Utc>, toggle: bool) -> Diff {
        let old_ids: std::collections::HashSet<ResourceId> = self.connectable_resources.iter().map(|r| r.id).collect();

        let mut new_list = Vec::new();
        let mut new_ids = std::collections::HashSet::new();
        for resource in self.resources.values() {
            if resource.gateway_groups.is_empty() {
                continue;
            }
            let conditions_for_resource: Vec<&PolicyEntry> = self
                .policies
                .values()
                .filter(|p| p.resource_id == resource.id && identity.group_ids.contains(&p.actor_group_id))
                .collect();
            let conforms = conditions_for_resource
                .iter()
                .any(|p| matches!(condition::evaluate(&p.conditions, ctx, subject_expiry), EvalOutcome::Ok { .. }));
            if conforms {
                new_ids.insert(resource.id);
                new_list.push(ResourceView::from(resource).for_client_version(identity.client_version));
            }
        }

        let added: Vec<ResourceView> = new_list.iter().filter(|r| !old_ids.contains(&r.id)).cloned().collect();
        let mut removed_ids: Vec<ResourceId> = old_ids.iter().filter(|id| !new_ids.contains(id)).copied().collect();
        if toggle {
            for id in &added {
                if old_ids.contains(&id.id) {
                    removed_ids.push(id.id);
                }
            }
        }

        self.connectable_resources = new_list;
        Diff { added_resources: added, removed_resource_ids: removed_ids, cache: self }
    }

    /// §4.5 `authorize_resource`: resolve a `connect_to_resource` request
    /// against the current connectable set and longest-conforming policy.
    pub fn authorize_resource(
        &self,
        resource_id: ResourceId,
        ctx: &ClientContext,
        subject_expiry: DateTime<Utc>,
    ) -> Result<(ResourceId, meridian_proto::MembershipId, PolicyId, DateTime<Utc>), CacheError> {
        if !self.connectable_resources.iter().any(|r| r.id == resource_id) {
            return Err(CacheError::NotFound(resource_id));
        }

        let candidates: Vec<(PolicyId, &PolicyEntry)> =
            self.policies.iter().filter(|(_, p)| p.resource_id == resource_id).map(|(id, p)| (*id, p)).collect();

        let mut violated = Vec::new();
        let mut best: Option<(PolicyId, DateTime<Utc>)> = None;
        for (policy_id, entry) in &candidates {
            match condition::evaluate(&entry.conditions, ctx, subject_expiry) {
                EvalOutcome::Ok { valid_until } => {
                    let better = match &best {
                        None => true,
                        Some((best_id, best_until)) => {
                            valid_until > *best_until || (valid_until == *best_until && policy_id.to_string() < best_id.to_string())
                        }
                    };
                    if better {
                        best = Some((*policy_id, valid_until));
                    }
                }
                EvalOutcome::Violated { violated: props } => {
                    violated.extend(props.into_iter().map(|p| format!("{p:?}")));
                }
            }
        }

        let Some((policy_id, expires_at)) = best else {
            return Err(CacheError::Forbidden { violated });
        };
        let entry = &self.policies[&policy_id];
        let membership_id = *self.memberships.get(&entry.actor_group_id).ok_or(CacheError::NotFound(resource_id))?;
        Ok((resource_id, membership_id, policy_id, expires_at))
    }

    pub fn add_membership(mut self, group_id: GroupId, membership_id: meridian_proto::MembershipId, identity: &mut ClientIdentity, ctx: &ClientContext, subject_expiry: DateTime<Utc>) -> Diff {
        self.memberships.insert(group_id, membership_id);
        identity.group_ids.push(group_id);
        self.recompute_connectable(identity, ctx, subject_expiry, false)
    }

    pub fn delete_membership(mut self, group_id: GroupId, identity: &mut ClientIdentity, ctx: &ClientContext, subject_expiry: DateTime<Utc>) -> Diff {
        self.memberships.remove(&group_id);
        identity.group_ids.retain(|g| *g != group_id);
        self.recompute_connectable(identity, ctx, subject_expiry, false)
    }

    pub fn add_policy(mut self, policy_id: PolicyId, entry: PolicyEntry, identity: &ClientIdentity, ctx: &ClientContext, subject_expiry: DateTime<Utc>) -> Diff {
        self.policies.insert(policy_id, entry);
        self.recompute_connectable(identity, ctx, subject_expiry, false)
    }

    pub fn update_policy(self, policy_id: PolicyId, entry: PolicyEntry, identity: &ClientIdentity, ctx: &ClientContext, subject_expiry: DateTime<Utc>) -> Diff {
        self.add_policy(policy_id, entry, identity, ctx, subject_expiry)
    }

    pub fn delete_policy(mut self, policy_id: PolicyId, identity: &ClientIdentity, ctx: &ClientContext, subject_expiry: DateTime<Utc>) -> Diff {
        self.policies.remove(&policy_id);
        self.recompute_connectable(identity, ctx, subject_expiry, false)
    }

    /// Resource-connection (gateway-group link) mutations are breaking for
    /// clients that cannot hot-change a resource's site, hence `toggle = true`.
    pub fn add_resource_connection(mut self, resource: Resource, identity: &ClientIdentity, ctx: &ClientContext, subject_expiry: DateTime<Utc>) -> Diff {
        self.resources.insert(resource.id, resource);
        self.recompute_connectable(identity, ctx, subject_expiry, true)
    }

    pub fn delete_resource_connection(mut self, resource_id: ResourceId, identity: &ClientIdentity, ctx: &ClientContext, subject_expiry: DateTime<Utc>) -> Diff {
        self.resources.remove(&resource_id);
        self.recompute_connectable(identity, ctx, subject_expiry, true)
    }

    pub fn update_resource(mut self, resource: Resource, identity: &ClientIdentity, ctx: &ClientContext, subject_expiry: DateTime<Utc>) -> Diff {
        self.resources.insert(resource.id, resource);
        self.recompute_connectable(identity, ctx, subject_expiry, true)
    }

    pub fn update_resources_with_group_name(self, identity: &ClientIdentity, ctx: &ClientContext, subject_expiry: DateTime<Utc>) -> Diff {
        // Group-name changes never affect a resource's address/filters, so
        // no connectivity change, but the cache is still recomputed to
        // refresh any denormalized display fields.
        self.recompute_connectable(identity, ctx, subject_expiry, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_proto::resource::{ResourceAddress, ResourceKind};
    use meridian_proto::GatewayGroupId;

    fn ctx() -> ClientContext {
        ClientContext {
            remote_ip: "127.0.0.1".parse().unwrap(),
            remote_region: None,
            provider_id: None,
            client_verified: true,
            now: Utc::now(),
        }
    }

    fn resource(id: ResourceId, gateway_groups: Vec<GatewayGroupId>) -> Resource {
        Resource {
            id,
            persistent_id: id,
            name: "app".into(),
            address: ResourceAddress { kind: ResourceKind::Dns, address: Some("a".into()), ip_stack: None, filters: vec![] },
            gateway_groups,
        }
    }

    #[test]
    fn resource_without_gateway_group_is_never_connectable() {
        let resource_id = ResourceId::new();
        let group_id = GroupId::new();
        let mut cache = ClientCache::default();
        cache.resources.insert(resource_id, resource(resource_id, vec![]));
        cache.policies.insert(PolicyId::new(), PolicyEntry { resource_id, actor_group_id: group_id, conditions: vec![] });

        let identity = ClientIdentity { account_id: AccountId::new(), actor_id: ActorId::new(), group_ids: vec![group_id], client_version: None };
        let diff = cache.recompute_connectable(&identity, &ctx(), Utc::now(), false);
        assert!(diff.cache.connectable_resources.is_empty());
    }

    #[test]
    fn resource_with_conforming_policy_becomes_connectable() {
        let resource_id = ResourceId::new();
        let group_id = GroupId::new();
        let mut cache = ClientCache::default();
        cache.resources.insert(resource_id, resource(resource_id, vec![GatewayGroupId::new()]));
        cache.policies.insert(PolicyId::new(), PolicyEntry { resource_id, actor_group_id: group_id, conditions: vec![] });

        let identity = ClientIdentity { account_id: AccountId::new(), actor_id: ActorId::new(), group_ids: vec![group_id], client_version: None };
        let diff = cache.recompute_connectable(&identity, &ctx(), Utc::now(), false);
        assert_eq!(diff.added_resources.len(), 1);
    }

    #[test]
    fn unauthorized_resource_lookup_is_not_found() {
        let cache = ClientCache::default();
        let err = cache.authorize_resource(ResourceId::new(), &ctx(), Utc::now()).unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
    }
}
