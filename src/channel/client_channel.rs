//! C8: client channel. Owns one connected client's session state: its C5
//! cache, its relay picks, and its in-flight flow-setup refs.

use crate::cache::{ClientCache, ClientIdentity, PolicyEntry};
use crate::channel::refs::{self, GatewayReplyRef};
use crate::channel::relay_select;
use crate::db::{ChangeOp, Database};
use crate::error::CacheError;
use crate::presence::Presence;
use crate::replication::Lsn;
use crate::router::Change;
use chrono::{DateTime, Utc};
use meridian_proto::condition::ClientContext;
use meridian_proto::event::{ClientEvent, ClientInterface, IceCredentials};
use meridian_proto::relay::{Relay, RelayView};
use meridian_proto::{AccountId, ClientId, GroupId, PolicyId, ResourceId};
use serde_json::Value;

pub struct ClientSession {
    pub client_id: ClientId,
    pub account_id: AccountId,
    pub account_slug: String,
    pub identity: ClientIdentity,
    pub cache: ClientCache,
    pub coords: Option<(f64, f64)>,
    pub ctx: ClientContext,
    pub subject_expiry: DateTime<Utc>,
    last_lsn: Option<Lsn>,
}

impl ClientSession {
    /// §4.8 `join`: hydrate the cache, register presence, pick relays and
    /// build the `init` payload. The caller is responsible for the socket
    /// link/teardown and for actually sending the returned event.
    #[allow(clippy::too_many_arguments)]
    pub async fn join(
        db: &Database,
        presence: &Presence,
        node: meridian_crdt::ServerId,
        client_id: ClientId,
        account_id: AccountId,
        account_slug: String,
        identity: ClientIdentity,
        coords: Option<(f64, f64)>,
        relay_candidates: &[Relay],
        interface: ClientInterface,
        config: serde_json::Value,
        ctx: ClientContext,
        subject_expiry: DateTime<Utc>,
    ) -> Result<(Self, ClientEvent), crate::error::DbError> {
        let hydrated = ClientCache::hydrate(db, &identity).await?;
        let diff = hydrated.recompute_connectable(&identity, &ctx, subject_expiry, false);

        presence.clients.connect(node, client_id, "".to_string());

        let relays = relay_select::select_relays(relay_candidates, coords);
        let relay_views: Vec<RelayView> = relays.into_iter().map(|r| relay_view(r, subject_expiry)).collect();

        let init = ClientEvent::Init {
            interface,
            resources: diff.cache.connectable_resources.clone(),
            relays: relay_views,
            account_slug: account_slug.clone(),
            config,
        };

        Ok((
            Self { client_id, account_id, account_slug, identity, cache: diff.cache, coords, ctx, subject_expiry, last_lsn: None },
            init,
        ))
    }

    /// §4.8 flow setup, client side: authorize against the cache and mint
    /// a signed ref for the gateway to validate.
    pub fn connect_to_resource(
        &self,
        resource_id: ResourceId,
        ctx: &ClientContext,
        subject_expiry: DateTime<Utc>,
        socket_ref: String,
        signing_key: &[u8],
    ) -> Result<(GatewayReplyRef, String, IceCredentials, String), CacheError> {
        let (resource_id, _membership_id, _policy_id, expires_at) = self.cache.authorize_resource(resource_id, ctx, subject_expiry)?;

        let preshared_key = generate_preshared_key();
        let ice_credentials = IceCredentials { username: generate_ice_component(), password: generate_ice_component() };

        let body = GatewayReplyRef {
            channel_id: self.client_id,
            socket_ref,
            resource_id,
            preshared_key: preshared_key.clone(),
            ice_username: ice_credentials.username.clone(),
            ice_password: ice_credentials.password.clone(),
        };
        let signed = refs::sign(&body, signing_key);
        let _ = expires_at;
        Ok((body, signed, ice_credentials, preshared_key))
    }

    /// §4.8/§4.9: react to a change fanned out on this client's account
    /// topic, mutating C5 and returning the diff events to push down the
    /// outbox. LSN-keyed so the same change applied twice is a no-op
    /// (§5's ordering/idempotence guarantee).
    pub async fn apply_change(&mut self, db: &Database, change: &Change) -> Vec<ClientEvent> {
        if let Some(last) = self.last_lsn {
            if change.lsn <= last {
                return vec![];
            }
        }
        self.last_lsn = Some(change.lsn);

        if change.account_id() != Some(self.account_id) {
            return vec![];
        }

        let cache = std::mem::take(&mut self.cache);
        let (cache, events) = match change.table.as_str() {
            "memberships" => self.apply_membership_change(cache, change),
            "policies" => self.apply_policy_change(cache, change),
            "resources" => self.apply_resource_change(cache, db, change).await,
            "resource_connections" => self.apply_resource_connection_change(cache, db, change).await,
            "actor_groups" => split_diff(cache.update_resources_with_group_name(&self.identity, &self.ctx, self.subject_expiry)),
            "accounts" => {
                if let Some(slug) = row_str(row_data(change), "slug") {
                    self.account_slug = slug.to_string();
                }
                (cache, vec![])
            }
            _ => (cache, vec![]),
        };
        self.cache = cache;
        events
    }

    fn apply_membership_change(&mut self, cache: ClientCache, change: &Change) -> (ClientCache, Vec<ClientEvent>) {
        let Some(data) = row_data(change) else { return (cache, vec![]) };
        let Some(actor_id) = row_uuid(data, "actor_id").map(meridian_proto::ActorId) else { return (cache, vec![]) };
        if actor_id != self.identity.actor_id {
            return (cache, vec![]);
        }
        let Some(group_id) = row_uuid(data, "group_id").map(GroupId) else { return (cache, vec![]) };

        match change.op {
            ChangeOp::Insert => {
                let membership_id = crate::db::membership_id(actor_id, group_id);
                split_diff(cache.add_membership(group_id, membership_id, &mut self.identity, &self.ctx, self.subject_expiry))
            }
            ChangeOp::Delete => split_diff(cache.delete_membership(group_id, &mut self.identity, &self.ctx, self.subject_expiry)),
            ChangeOp::Update => (cache, vec![]),
        }
    }

    fn apply_policy_change(&mut self, cache: ClientCache, change: &Change) -> (ClientCache, Vec<ClientEvent>) {
        if change.op == ChangeOp::Delete {
            let Some(data) = change.old.as_ref() else { return (cache, vec![]) };
            let Some(policy_id) = row_uuid(data, "id").map(PolicyId) else { return (cache, vec![]) };
            return split_diff(cache.delete_policy(policy_id, &self.identity, &self.ctx, self.subject_expiry));
        }

        let Some(data) = row_data(change) else { return (cache, vec![]) };
        let Some(policy_id) = row_uuid(data, "id").map(PolicyId) else { return (cache, vec![]) };
        let Some(actor_group_id) = row_uuid(data, "actor_group_id").map(GroupId) else { return (cache, vec![]) };
        let Some(resource_id) = row_uuid(data, "resource_id").map(ResourceId) else { return (cache, vec![]) };
        let disabled = data.get("disabled_at").map(|v| !v.is_null()).unwrap_or(false);
        let deleted = data.get("deleted_at").map(|v| !v.is_null()).unwrap_or(false);

        if !self.identity.group_ids.contains(&actor_group_id) {
            return (cache, vec![]);
        }

        if disabled || deleted {
            return split_diff(cache.delete_policy(policy_id, &self.identity, &self.ctx, self.subject_expiry));
        }

        let conditions = data.get("conditions").cloned().and_then(|v| serde_json::from_value(v).ok()).unwrap_or_default();
        let entry = PolicyEntry { resource_id, actor_group_id, conditions };
        split_diff(cache.add_policy(policy_id, entry, &self.identity, &self.ctx, self.subject_expiry))
    }

    async fn apply_resource_change(&mut self, cache: ClientCache, db: &Database, change: &Change) -> (ClientCache, Vec<ClientEvent>) {
        let Some(resource_id) = row_data(change).and_then(|data| row_uuid(data, "id")).map(ResourceId) else { return (cache, vec![]) };

        if change.op == ChangeOp::Delete {
            return split_diff(cache.delete_resource_connection(resource_id, &self.identity, &self.ctx, self.subject_expiry));
        }

        match db.resources().find(resource_id).await {
            Ok(Some(resource)) => split_diff(cache.update_resource(resource, &self.identity, &self.ctx, self.subject_expiry)),
            _ => (cache, vec![]),
        }
    }

    async fn apply_resource_connection_change(&mut self, cache: ClientCache, db: &Database, change: &Change) -> (ClientCache, Vec<ClientEvent>) {
        let Some(resource_id) = row_data(change).and_then(|data| row_uuid(data, "resource_id")).map(ResourceId) else { return (cache, vec![]) };

        match db.resources().find(resource_id).await {
            Ok(Some(resource)) => split_diff(cache.update_resource(resource, &self.identity, &self.ctx, self.subject_expiry)),
            _ => split_diff(cache.delete_resource_connection(resource_id, &self.identity, &self.ctx, self.subject_expiry)),
        }
    }
}

/// Pull a `Diff` apart into the cache to store and the wire events to
/// push, ordered deletes-then-creates (§8 "resource address change":
/// `resource_deleted` then `resource_created_or_updated`).
fn split_diff(diff: crate::cache::Diff) -> (ClientCache, Vec<ClientEvent>) {
    let mut events = Vec::with_capacity(diff.removed_resource_ids.len() + diff.added_resources.len());
    for resource_id in diff.removed_resource_ids {
        events.push(ClientEvent::ResourceDeleted { resource_id });
    }
    for view in diff.added_resources {
        events.push(ClientEvent::ResourceCreatedOrUpdated(view));
    }
    (diff.cache, events)
}

fn row_data(change: &Change) -> Option<&Value> {
    change.new.as_ref().or(change.old.as_ref())
}

fn row_uuid(data: &Value, key: &str) -> Option<uuid::Uuid> {
    data.get(key)?.as_str()?.parse().ok()
}

fn row_str<'a>(data: Option<&'a Value>, key: &str) -> Option<&'a str> {
    data?.get(key)?.as_str()
}

fn relay_view(relay: &Relay, expires_at: DateTime<Utc>) -> RelayView {
    RelayView {
        id: relay.id,
        ipv4: relay.ipv4,
        ipv6: relay.ipv6,
        username: format!("{}:{}", relay.id, expires_at.timestamp()),
        password: relay.stamp_secret.clone(),
        expires_at,
    }
}

fn generate_preshared_key() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn generate_ice_component() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

use base64::Engine;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ClientCache;

    #[test]
    fn connect_to_resource_rejects_unknown_resource() {
        let ctx = ClientContext { remote_ip: "0.0.0.0".parse().unwrap(), remote_region: None, provider_id: None, client_verified: true, now: Utc::now() };
        let session = ClientSession {
            client_id: ClientId::new(),
            account_id: AccountId::new(),
            account_slug: "acme".into(),
            identity: ClientIdentity { account_id: AccountId::new(), actor_id: meridian_proto::ActorId::new(), group_ids: vec![], client_version: None },
            cache: ClientCache::default(),
            coords: None,
            ctx: ctx.clone(),
            subject_expiry: Utc::now(),
            last_lsn: None,
        };
        let result = session.connect_to_resource(ResourceId::new(), &ctx, Utc::now(), "ref1".into(), b"key");
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }
}
