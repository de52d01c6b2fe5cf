//! C6: per-gateway cache of currently granted policy authorizations.

use chrono::{DateTime, Utc};
use meridian_proto::{ClientId, PolicyAuthorizationId, ResourceId};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct Authorization {
    pub policy_authorization_id: PolicyAuthorizationId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct GatewayCache {
    authorizations: HashMap<(ClientId, ResourceId), Authorization>,
    pairs_by_resource: HashMap<ResourceId, Vec<(ClientId, ResourceId)>>,
}

impl GatewayCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, client_id: ClientId, resource_id: ResourceId, policy_authorization_id: PolicyAuthorizationId, expires_at: DateTime<Utc>) {
        let key = (client_id, resource_id);
        if !self.authorizations.contains_key(&key) {
            self.pairs_by_resource.entry(resource_id).or_default().push(key);
        }
        self.authorizations.insert(key, Authorization { policy_authorization_id, expires_at });
    }

    #[must_use]
    pub fn get(&self, client_id: ClientId, resource_id: ResourceId) -> Option<Authorization> {
        self.authorizations.get(&(client_id, resource_id)).copied()
    }

    pub fn remove(&mut self, client_id: ClientId, resource_id: ResourceId) {
        let key = (client_id, resource_id);
        self.authorizations.remove(&key);
        if let Some(pairs) = self.pairs_by_resource.get_mut(&resource_id) {
            pairs.retain(|p| *p != key);
        }
    }

    #[must_use]
    pub fn all_pairs_for_resource(&self, resource_id: ResourceId) -> Vec<(ClientId, ResourceId)> {
        self.pairs_by_resource.get(&resource_id).cloned().unwrap_or_default()
    }

    /// Remove every authorization that has already expired. Scheduled
    /// every minute.
    pub fn prune(&mut self) {
        let now = Utc::now();
        let expired: Vec<(ClientId, ResourceId)> =
            self.authorizations.iter().filter(|(_, auth)| auth.expires_at <= now).map(|(k, _)| *k).collect();
        for key in expired {
            self.remove(key.0, key.1);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.authorizations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.authorizations.is_empty()
    }
}

/// Outcome of `reauthorize_deleted_policy_authorization`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reauthorization {
    Tightened { expires_at: DateTime<Utc> },
    Unauthorized,
}

/// §4.6: on delete of a `PolicyAuthorization`, check whether another
/// non-expired authorization for the same (client, resource, gateway)
/// still covers access.
#[must_use]
pub fn reauthorize_deleted_policy_authorization(others: &[(PolicyAuthorizationId, DateTime<Utc>)]) -> Reauthorization {
    others
        .iter()
        .max_by_key(|(_, expires_at)| *expires_at)
        .map(|(_, expires_at)| Reauthorization::Tightened { expires_at: *expires_at })
        .unwrap_or(Reauthorization::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let mut cache = GatewayCache::new();
        let client_id = ClientId::new();
        let resource_id = ResourceId::new();
        let auth_id = PolicyAuthorizationId::new();
        let expires_at = Utc::now();
        cache.put(client_id, resource_id, auth_id, expires_at);
        let auth = cache.get(client_id, resource_id).unwrap();
        assert_eq!(auth.policy_authorization_id, auth_id);
    }

    #[test]
    fn all_pairs_for_resource_reflects_puts() {
        let mut cache = GatewayCache::new();
        let resource_id = ResourceId::new();
        cache.put(ClientId::new(), resource_id, PolicyAuthorizationId::new(), Utc::now());
        cache.put(ClientId::new(), resource_id, PolicyAuthorizationId::new(), Utc::now());
        assert_eq!(cache.all_pairs_for_resource(resource_id).len(), 2);
    }

    #[test]
    fn prune_removes_expired_entries() {
        let mut cache = GatewayCache::new();
        let client_id = ClientId::new();
        let resource_id = ResourceId::new();
        cache.put(client_id, resource_id, PolicyAuthorizationId::new(), Utc::now() - chrono::Duration::seconds(1));
        cache.prune();
        assert!(cache.is_empty());
    }

    #[test]
    fn reauthorize_picks_latest_expiry_among_survivors() {
        let a = (PolicyAuthorizationId::new(), Utc::now() + chrono::Duration::minutes(5));
        let b = (PolicyAuthorizationId::new(), Utc::now() + chrono::Duration::minutes(10));
        let outcome = reauthorize_deleted_policy_authorization(&[a, b]);
        assert_eq!(outcome, Reauthorization::Tightened { expires_at: b.1 });
    }

    #[test]
    fn reauthorize_with_no_survivors_is_unauthorized() {
        assert_eq!(reauthorize_deleted_policy_authorization(&[]), Reauthorization::Unauthorized);
    }
}
