//! Strongly-typed UUID wrappers for every entity in the data model.
//!
//! Each id is a thin newtype over [`uuid::Uuid`] so that, for example, a
//! `ResourceId` can never be passed where a `GatewayId` is expected. All ids
//! serialize as plain UUID strings over the wire and as raw 16-byte values
//! when embedded in cache structures (see `meridian_core::cache`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// The raw 16-byte representation, used by the in-memory caches.
            #[must_use]
            pub fn as_bytes(&self) -> [u8; 16] {
                *self.0.as_bytes()
            }

            /// Reconstruct from a raw 16-byte value.
            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }
    };
}

uuid_id!(AccountId, "Tenant identifier.");
uuid_id!(ActorId, "Administrative abstraction for a person or service account.");
uuid_id!(IdentityId, "An actor's identity with a specific provider.");
uuid_id!(ProviderId, "Identity provider configured on an account.");
uuid_id!(GroupId, "Actor group (static, managed or synced).");
uuid_id!(ResourceId, "Addressable connect target.");
uuid_id!(ResourceConnectionId, "Join row between a resource and a gateway group.");
uuid_id!(GatewayGroupId, "A named collection of gateways serving the same resources.");
uuid_id!(GatewayId, "A single gateway process.");
uuid_id!(RelayId, "A relay server.");
uuid_id!(PolicyId, "A policy binding a group to a resource.");
uuid_id!(PolicyAuthorizationId, "A concrete in-flight authorized flow.");
uuid_id!(MembershipId, "An actor's membership row in a group.");
uuid_id!(ClientId, "A connected client session's stable identity.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_string() {
        let id = ResourceId::new();
        let s = id.to_string();
        let parsed: ResourceId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn roundtrips_through_raw_bytes() {
        let id = GatewayId::new();
        let bytes = id.as_bytes();
        assert_eq!(GatewayId::from_bytes(bytes), id);
    }

    #[test]
    fn distinct_types_do_not_compare() {
        // Compile-time guarantee only: ResourceId and GatewayId aren't
        // interchangeable even though both wrap Uuid. No runtime assertion
        // needed; this test exists to exercise Display/FromStr for both.
        let r = ResourceId::new();
        let g = GatewayId::new();
        assert_ne!(r.to_string(), "");
        assert_ne!(g.to_string(), "");
    }
}
