//! Relay data model: TURN-like forwarding servers, global or account-scoped.

use crate::ids::{AccountId, RelayId};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relay {
    pub id: RelayId,
    /// `None` for a global relay shared across accounts.
    pub account_id: Option<AccountId>,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    /// Rotated credential used to derive TURN username/password pairs.
    pub stamp_secret: String,
    pub coords: Option<(f64, f64)>,
}

/// What's pushed to a client/gateway in `init` and `relays_presence`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayView {
    pub id: RelayId,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub username: String,
    pub password: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}
