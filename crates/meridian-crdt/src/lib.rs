//! Conflict-free presence tracking shared across control-plane nodes.
//!
//! Presence is the only cluster-shared mutable state in the system (§5:
//! "Presence is cluster-shared, CRDT-merged; no single-writer assumption").
//! Everything else — caches, condition evaluation — is thread-confined to
//! one session and lives in the core crate.

pub mod clock;
pub mod lww;
pub mod presence;
pub mod traits;

pub use clock::{HybridTimestamp, ServerId};
pub use lww::LwwRegister;
pub use presence::{Presence, PresenceTopic};
pub use traits::{Crdt, Mergeable, StateDelta};
