//! C1: logical-replication tailer. Speaks enough of the Postgres
//! replication protocol to stream committed row changes off the primary
//! in LSN order, with per-subscriber dedup and lag alerting.

pub mod frame;
pub mod lsn;
pub mod tailer;
pub mod transport;

pub use lsn::{Lsn, LsnTracker};
pub use tailer::{RowChange, Tailer, TailerConfig, TailerState};
pub use transport::{ReplicationTransport, TcpReplicationTransport};
