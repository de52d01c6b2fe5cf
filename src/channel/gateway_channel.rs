//! C9: gateway channel. Mirrors C8 with the inverse role — validates
//! signed refs from a client channel and tracks granted flows in C6.

use crate::cache::{reauthorize_deleted_policy_authorization, GatewayCache, Reauthorization};
use crate::channel::refs::{self, GatewayReplyRef};
use crate::db::{ChangeOp, Database};
use crate::error::RefError;
use crate::router::Change;
use chrono::{DateTime, Utc};
use meridian_proto::event::{GatewayEvent, IceCredentials, SubjectView};
use meridian_proto::resource::ResourceView;
use meridian_proto::{ClientId, GatewayId, PolicyAuthorizationId, ResourceId};
use serde_json::Value;

pub struct GatewaySession {
    pub gateway_id: GatewayId,
    pub cache: GatewayCache,
}

impl GatewaySession {
    #[must_use]
    pub fn new(gateway_id: GatewayId) -> Self {
        Self { gateway_id, cache: GatewayCache::new() }
    }

    /// Validate an inbound `authorize_flow` ref and, if still valid,
    /// record the authorization in C6 so a later policy-authorization
    /// delete can look it up.
    pub fn authorize_flow(
        &mut self,
        reference: &str,
        signing_key: &[u8],
        policy_authorization_id: PolicyAuthorizationId,
        expires_at: DateTime<Utc>,
    ) -> Result<GatewayReplyRef, RefError> {
        let decoded = refs::verify(reference, signing_key)?;
        self.cache.put(decoded.channel_id, decoded.resource_id, policy_authorization_id, expires_at);
        Ok(decoded)
    }

    /// Build the `authorize_flow` event pushed to the gateway side, from a
    /// decoded client-side ref.
    #[must_use]
    pub fn build_authorize_flow_event(
        client_id: ClientId,
        resource: ResourceView,
        subject: SubjectView,
        preshared_key: String,
        ice_credentials: IceCredentials,
        expires_at: DateTime<Utc>,
        reference: String,
    ) -> GatewayEvent {
        GatewayEvent::AuthorizeFlow { client_id, resource, subject, preshared_key, ice_credentials, expires_at, reference }
    }

    /// §4.6/§4.9: react to a change fanned out on this gateway's account
    /// topic, mutating C6 and returning the events to push down the
    /// outbox.
    pub async fn apply_change(&mut self, db: &Database, change: &Change) -> Vec<GatewayEvent> {
        match change.table.as_str() {
            "resources" => self.apply_resource_change(change),
            "policy_authorizations" => self.apply_policy_authorization_change(db, change).await,
            _ => vec![],
        }
    }

    /// A breaking resource change (address/site moved, resource removed)
    /// invalidates every flow this gateway currently brokers for it.
    fn apply_resource_change(&mut self, change: &Change) -> Vec<GatewayEvent> {
        if change.op == ChangeOp::Insert {
            return vec![];
        }
        let Some(resource_id) = row_data(change).and_then(|d| row_uuid(d, "id")).map(ResourceId) else {
            return vec![];
        };

        let pairs = self.cache.all_pairs_for_resource(resource_id);
        let mut events = Vec::with_capacity(pairs.len());
        for (client_id, resource_id) in pairs {
            self.cache.remove(client_id, resource_id);
            events.push(GatewayEvent::RejectAccess { client_id, resource_id });
        }
        events
    }

    /// §4.6: on delete of a `PolicyAuthorization` this gateway granted,
    /// check whether a surviving authorization still covers the pair and
    /// either tighten the expiry or reject access outright.
    async fn apply_policy_authorization_change(&mut self, db: &Database, change: &Change) -> Vec<GatewayEvent> {
        if change.op != ChangeOp::Delete {
            return vec![];
        }
        let Some(data) = change.old.as_ref() else { return vec![] };
        let Some(gateway_id) = row_uuid(data, "gateway_id").map(GatewayId) else { return vec![] };
        if gateway_id != self.gateway_id {
            return vec![];
        }
        let Some(auth_id) = row_uuid(data, "id").map(PolicyAuthorizationId) else { return vec![] };
        let Some(client_id) = row_uuid(data, "client_id").map(ClientId) else { return vec![] };
        let Some(resource_id) = row_uuid(data, "resource_id").map(ResourceId) else { return vec![] };

        let Some(current) = self.cache.get(client_id, resource_id) else { return vec![] };
        if current.policy_authorization_id != auth_id {
            return vec![];
        }

        let others = db
            .policies()
            .other_authorizations(client_id, resource_id, gateway_id, auth_id)
            .await
            .unwrap_or_default();
        let candidates: Vec<(PolicyAuthorizationId, DateTime<Utc>)> =
            others.iter().map(|r| (PolicyAuthorizationId(r.id), r.expires_at)).collect();

        match reauthorize_deleted_policy_authorization(&candidates) {
            Reauthorization::Tightened { expires_at } => {
                let surviving =
                    others.iter().find(|r| r.expires_at == expires_at).map(|r| PolicyAuthorizationId(r.id)).unwrap_or(auth_id);
                self.cache.put(client_id, resource_id, surviving, expires_at);
                vec![GatewayEvent::AccessAuthorizationExpiryUpdated { policy_authorization_id: surviving, expires_at }]
            }
            Reauthorization::Unauthorized => {
                self.cache.remove(client_id, resource_id);
                vec![GatewayEvent::RejectAccess { client_id, resource_id }]
            }
        }
    }
}

fn row_data(change: &Change) -> Option<&Value> {
    change.new.as_ref().or(change.old.as_ref())
}

fn row_uuid(data: &Value, key: &str) -> Option<uuid::Uuid> {
    data.get(key)?.as_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_proto::ResourceId;

    #[test]
    fn invalid_ref_is_rejected() {
        let mut session = GatewaySession::new(GatewayId::new());
        let result = session.authorize_flow("not-a-real-ref", b"key", PolicyAuthorizationId::new(), Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn valid_ref_records_authorization_in_cache() {
        let key = b"0123456789abcdef0123456789abcdef";
        let body = GatewayReplyRef {
            channel_id: ClientId::new(),
            socket_ref: "r1".into(),
            resource_id: ResourceId::new(),
            preshared_key: "psk".into(),
            ice_username: "u".into(),
            ice_password: "p".into(),
        };
        let token = refs::sign(&body, key);

        let mut session = GatewaySession::new(GatewayId::new());
        let auth_id = PolicyAuthorizationId::new();
        let expires_at = Utc::now() + chrono::Duration::hours(1);
        session.authorize_flow(&token, key, auth_id, expires_at).unwrap();

        let stored = session.cache.get(body.channel_id, body.resource_id).unwrap();
        assert_eq!(stored.policy_authorization_id, auth_id);
    }
}
