//! Domain identifiers and wire types shared by the control plane, its
//! clients, and its gateways.
//!
//! This crate has no async runtime dependency and no database dependency:
//! it is pure data, so the core binary, the cache layer and the channel
//! layer can all depend on it without pulling each other in.

pub mod condition;
pub mod error;
pub mod event;
pub mod ids;
pub mod message;
pub mod relay;
pub mod resource;
pub mod validate;

pub use condition::{ClientContext, Condition, Operator, Property};
pub use error::ProtoError;
pub use event::{ClientEvent, ClientRequest, GatewayEvent, GatewayRequest, IceCredentials, SubjectView};
pub use ids::{
    AccountId, ActorId, ClientId, GatewayGroupId, GatewayId, GroupId, IdentityId, MembershipId,
    PolicyAuthorizationId, PolicyId, ProviderId, RelayId, ResourceConnectionId, ResourceId,
};
pub use message::Envelope;
pub use relay::{Relay, RelayView};
pub use resource::{Filter, IpStack, PortRange, Protocol, Resource, ResourceAddress, ResourceKind, ResourceView};
pub use validate::ValidationError;
