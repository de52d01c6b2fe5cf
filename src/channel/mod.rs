//! C8/C9: client and gateway channels — the per-session actors that sit
//! between a socket and the shared caches/presence/router.

pub mod client_channel;
pub mod debounce;
pub mod gateway_channel;
pub mod refs;
pub mod relay_select;

pub use client_channel::ClientSession;
pub use gateway_channel::GatewaySession;
