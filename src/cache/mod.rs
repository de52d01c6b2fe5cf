//! C5/C6: per-session materialized caches. Thread-confined — owned
//! exclusively by the client or gateway session they serve, never shared.

pub mod client_cache;
pub mod gateway_cache;

pub use client_cache::{ClientCache, ClientIdentity, Diff, PolicyEntry};
pub use gateway_cache::{reauthorize_deleted_policy_authorization, Authorization, GatewayCache, Reauthorization};
