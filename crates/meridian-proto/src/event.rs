//! The client/gateway event catalog (§6 of the control-plane protocol).
//!
//! Each variant pairs with the payload shape documented alongside it. Legacy
//! `allow_access` / `request_connection` events are intentionally absent:
//! only the current `authorize_flow`/`flow_authorized` path is supported.

use crate::ids::{ClientId, GatewayId, PolicyAuthorizationId, RelayId, ResourceId};
use crate::relay::RelayView;
use crate::resource::ResourceView;
use serde::{Deserialize, Serialize};

/// Events pushed from the control plane to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    Init {
        interface: ClientInterface,
        resources: Vec<ResourceView>,
        relays: Vec<RelayView>,
        account_slug: String,
        config: serde_json::Value,
    },
    ResourceCreatedOrUpdated(ResourceView),
    ResourceDeleted {
        resource_id: ResourceId,
    },
    RelaysPresence {
        disconnected_ids: Vec<RelayId>,
        connected: Vec<RelayView>,
    },
    FlowAuthorized {
        resource_id: ResourceId,
        gateway_id: GatewayId,
        preshared_key: String,
        ice_credentials: IceCredentials,
        expires_at: chrono::DateTime<chrono::Utc>,
    },
    AccessAuthorizationExpiryUpdated {
        policy_authorization_id: PolicyAuthorizationId,
        expires_at: chrono::DateTime<chrono::Utc>,
    },
    RejectAccess {
        resource_id: ResourceId,
    },
    /// Relayed from a gateway's `broadcast_ice_candidates`, one event per
    /// named recipient client.
    BroadcastIceCandidates {
        gateway_id: GatewayId,
        candidates: Vec<String>,
    },
    BroadcastInvalidatedIceCandidates {
        gateway_id: GatewayId,
        candidates: Vec<String>,
    },
}

/// Messages a client sends to the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    ConnectToResource {
        resource_id: ResourceId,
    },
    BroadcastIceCandidates {
        candidates: Vec<String>,
        gateway_ids: Vec<GatewayId>,
    },
    BroadcastInvalidatedIceCandidates {
        candidates: Vec<String>,
        gateway_ids: Vec<GatewayId>,
    },
}

/// Events exchanged on the gateway channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum GatewayEvent {
    AuthorizeFlow {
        client_id: ClientId,
        resource: ResourceView,
        subject: SubjectView,
        preshared_key: String,
        ice_credentials: IceCredentials,
        expires_at: chrono::DateTime<chrono::Utc>,
        reference: String,
    },
    RejectAccess {
        client_id: ClientId,
        resource_id: ResourceId,
    },
    AccessAuthorizationExpiryUpdated {
        policy_authorization_id: PolicyAuthorizationId,
        expires_at: chrono::DateTime<chrono::Utc>,
    },
    RelaysPresence {
        disconnected_ids: Vec<RelayId>,
        connected: Vec<RelayView>,
    },
    /// Relayed from a client's `broadcast_ice_candidates`, one event per
    /// named recipient gateway.
    BroadcastIceCandidates {
        client_id: ClientId,
        candidates: Vec<String>,
    },
    BroadcastInvalidatedIceCandidates {
        client_id: ClientId,
        candidates: Vec<String>,
    },
}

/// What the gateway reports back on its channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum GatewayRequest {
    FlowAuthorized {
        reference: String,
    },
    FlowRejected {
        reference: String,
    },
    BroadcastIceCandidates {
        candidates: Vec<String>,
        client_ids: Vec<ClientId>,
    },
    BroadcastInvalidatedIceCandidates {
        candidates: Vec<String>,
        client_ids: Vec<ClientId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientInterface {
    Tunnel,
    Gui,
    Headless,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCredentials {
    pub username: String,
    pub password: String,
}

/// The subject (actor/identity) view sent alongside a flow authorization,
/// so a gateway can log/attribute the connection without a DB round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectView {
    pub actor_id: crate::ids::ActorId,
    pub name: String,
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_roundtrips_through_json() {
        let ev = ClientEvent::ResourceDeleted { resource_id: ResourceId::new() };
        let json = serde_json::to_string(&ev).unwrap();
        let back: ClientEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }

    #[test]
    fn tag_matches_catalog_name() {
        let ev = ClientRequest::ConnectToResource { resource_id: ResourceId::new() };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "connect_to_resource");
    }
}
