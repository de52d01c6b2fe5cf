//! C1: the replication tailer state machine.
//!
//! `disconnected → check_publication → check_publication_tables →
//! add_publication_tables → remove_publication_tables →
//! check_replication_slot → create_slot → start_replication_slot →
//! streaming`
//!
//! The pre-streaming states are plain SQL run over the ordinary pool;
//! `streaming` pumps CopyBoth frames off a [`ReplicationTransport`]. Kept
//! as a free-standing state machine (rather than folded into a loop) so
//! each transition is unit-testable against a fake transport.

use crate::error::ReplicationError;
use crate::metrics;
use crate::replication::frame::{decode_copy_frame, decode_pgoutput, encode_standby_status, pg_micros_to_datetime, CopyFrame, Pgoutput};
use crate::replication::lsn::{Lsn, LsnTracker};
use crate::replication::transport::ReplicationTransport;
use chrono::Utc;
use sqlx::PgPool;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailerState {
    Disconnected,
    CheckPublication,
    CheckPublicationTables,
    AddPublicationTables(Vec<String>),
    RemovePublicationTables(Vec<String>),
    CheckReplicationSlot,
    CreateSlot,
    StartReplicationSlot,
    Streaming,
}

pub struct TailerConfig {
    pub slot_name: String,
    pub publication_name: String,
    pub tracked_tables: Vec<String>,
    pub proto_version: u32,
    pub alert_threshold_ms: i64,
}

/// A fully decoded, committed row change ready for the change-log writer
/// and change router.
#[derive(Debug, Clone)]
pub struct RowChange {
    pub lsn: Lsn,
    pub table: String,
    pub payload: Pgoutput,
}

/// Drives the publication/slot bookkeeping over `pool`, then streams
/// committed changes off `transport`. `pool` and `transport` are
/// deliberately two different connections: Postgres requires replication
/// connections to set `replication=database` and cannot run ordinary
/// catalog queries on the same socket.
pub struct Tailer<T: ReplicationTransport> {
    pool: PgPool,
    transport: T,
    config: TailerConfig,
    state: TailerState,
    lag_threshold_exceeded: bool,
    relations: std::collections::HashMap<u32, (String, String)>,
    pending_removals: Vec<String>,
}

impl<T: ReplicationTransport> Tailer<T> {
    pub fn new(pool: PgPool, transport: T, config: TailerConfig) -> Self {
        Self {
            pool,
            transport,
            config,
            state: TailerState::Disconnected,
            lag_threshold_exceeded: false,
            relations: std::collections::HashMap::new(),
            pending_removals: Vec::new(),
        }
    }

    pub fn state(&self) -> &TailerState {
        &self.state
    }

    /// Run the full bring-up sequence, leaving the tailer in
    /// `TailerState::Streaming` with `START_REPLICATION` already issued.
    pub async fn bring_up(&mut self) -> Result<(), ReplicationError> {
        self.state = TailerState::CheckPublication;
        loop {
            match std::mem::replace(&mut self.state, TailerState::Disconnected) {
                TailerState::CheckPublication => self.check_publication().await?,
                TailerState::CheckPublicationTables => self.check_publication_tables().await?,
                TailerState::AddPublicationTables(tables) => self.add_publication_tables(tables).await?,
                TailerState::RemovePublicationTables(tables) => self.remove_publication_tables(tables).await?,
                TailerState::CheckReplicationSlot => self.check_replication_slot().await?,
                TailerState::CreateSlot => self.create_slot().await?,
                TailerState::StartReplicationSlot => {
                    self.start_replication_slot().await?;
                    self.state = TailerState::Streaming;
                    return Ok(());
                }
                other => {
                    self.state = other;
                    return Ok(());
                }
            }
        }
    }

    async fn check_publication(&mut self) -> Result<(), ReplicationError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_publication WHERE pubname = $1)")
            .bind(&self.config.publication_name)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            let tables = self.config.tracked_tables.join(", ");
            let sql = format!("CREATE PUBLICATION {} FOR TABLE {tables}", self.config.publication_name);
            sqlx::raw_sql(&sql).execute(&self.pool).await?;
            self.state = TailerState::CheckReplicationSlot;
        } else {
            self.state = TailerState::CheckPublicationTables;
        }
        Ok(())
    }

    async fn check_publication_tables(&mut self) -> Result<(), ReplicationError> {
        let current: Vec<String> = sqlx::query_scalar(
            "SELECT tablename FROM pg_publication_tables WHERE pubname = $1",
        )
        .bind(&self.config.publication_name)
        .fetch_all(&self.pool)
        .await?;

        let desired = &self.config.tracked_tables;
        let add_set: Vec<String> = desired.iter().filter(|t| !current.contains(t)).cloned().collect();
        let remove_set: Vec<String> = current.iter().filter(|t| !desired.contains(t)).cloned().collect();

        if !add_set.is_empty() {
            self.state = TailerState::AddPublicationTables(add_set);
            // remove_set is carried via the subsequent RemovePublicationTables state
            // once the add pass completes; stash it on self so it survives the hop.
            self.pending_removals = remove_set;
        } else if !remove_set.is_empty() {
            self.state = TailerState::RemovePublicationTables(remove_set);
        } else {
            self.state = TailerState::CheckReplicationSlot;
        }
        Ok(())
    }

    async fn add_publication_tables(&mut self, tables: Vec<String>) -> Result<(), ReplicationError> {
        for table in &tables {
            let sql = format!("ALTER PUBLICATION {} ADD TABLE {table}", self.config.publication_name);
            sqlx::raw_sql(&sql).execute(&self.pool).await?;
        }
        let remaining = std::mem::take(&mut self.pending_removals);
        self.state = if remaining.is_empty() {
            TailerState::CheckReplicationSlot
        } else {
            TailerState::RemovePublicationTables(remaining)
        };
        Ok(())
    }

    async fn remove_publication_tables(&mut self, mut tables: Vec<String>) -> Result<(), ReplicationError> {
        if let Some(table) = tables.pop() {
            let sql = format!("ALTER PUBLICATION {} DROP TABLE {table}", self.config.publication_name);
            sqlx::raw_sql(&sql).execute(&self.pool).await?;
        }
        self.state = if tables.is_empty() {
            TailerState::CheckReplicationSlot
        } else {
            TailerState::RemovePublicationTables(tables)
        };
        Ok(())
    }

    async fn check_replication_slot(&mut self) -> Result<(), ReplicationError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_replication_slots WHERE slot_name = $1)",
        )
        .bind(&self.config.slot_name)
        .fetch_one(&self.pool)
        .await?;
        self.state = if exists { TailerState::StartReplicationSlot } else { TailerState::CreateSlot };
        Ok(())
    }

    async fn create_slot(&mut self) -> Result<(), ReplicationError> {
        let sql = format!(
            "SELECT pg_create_logical_replication_slot('{}', 'pgoutput', false, false)",
            self.config.slot_name
        );
        sqlx::raw_sql(&sql).execute(&self.pool).await?;
        self.state = TailerState::StartReplicationSlot;
        Ok(())
    }

    async fn start_replication_slot(&mut self) -> Result<(), ReplicationError> {
        let sql = format!(
            "START_REPLICATION SLOT {} LOGICAL 0/0 (proto_version '{}', publication_names '{}')",
            self.config.slot_name, self.config.proto_version, self.config.publication_name
        );
        self.transport
            .send_query(&sql)
            .await
            .map_err(|e| ReplicationError::Fatal(e.to_string()))?;
        tracing::info!(slot = %self.config.slot_name, "replication stream started");
        Ok(())
    }

    /// Pull and decode the next committed row change, driving KeepAlive
    /// replies and lag accounting internally. Returns `None` on a clean
    /// stream shutdown.
    pub async fn next_change(&mut self, tracker: &mut LsnTracker) -> Result<Option<RowChange>, ReplicationError> {
        loop {
            let raw = self
                .transport
                .recv_copy_data()
                .await
                .map_err(|e| ReplicationError::Fatal(e.to_string()))?;
            let Some(raw) = raw else { return Ok(None) };

            match decode_copy_frame(raw) {
                Ok(CopyFrame::KeepAlive { wal_end, reply_requested, .. }) => {
                    if reply_requested {
                        let now_us = Utc::now().timestamp_micros() - super::frame::PG_EPOCH_MICROS;
                        let reply = encode_standby_status(wal_end + 1, wal_end + 1, wal_end + 1, now_us, true);
                        self.transport
                            .send_copy_data(&reply)
                            .await
                            .map_err(|e| ReplicationError::Fatal(e.to_string()))?;
                    }
                }
                Ok(CopyFrame::Write { wal_end, payload, .. }) => {
                    metrics::REPLICATION_EVENTS_TOTAL.inc();
                    let lsn = Lsn(wal_end);
                    match decode_pgoutput(payload) {
                        Ok(Pgoutput::Relation { relation_id, namespace, name }) => {
                            self.relations.insert(relation_id, (namespace, name));
                        }
                        Ok(Pgoutput::Commit { commit_ts_micros, .. }) => {
                            self.record_lag(commit_ts_micros);
                        }
                        Ok(change @ (Pgoutput::Insert { .. } | Pgoutput::Update { .. } | Pgoutput::Delete { .. })) => {
                            if !tracker.accept("change_router", lsn) {
                                continue;
                            }
                            let table = self.table_name(&change);
                            return Ok(Some(RowChange { lsn, table, payload: change }));
                        }
                        Ok(Pgoutput::Begin { .. }) => {}
                        Err(_) => {
                            tracing::warn!(wal_end, "dropping malformed pgoutput frame");
                        }
                    }
                }
                Ok(CopyFrame::Unknown) => {}
                Err(_) => {
                    tracing::warn!("dropping malformed copy frame");
                }
            }
        }
    }

    fn table_name(&self, change: &Pgoutput) -> String {
        let relation_id = match change {
            Pgoutput::Insert { relation_id, .. } | Pgoutput::Update { relation_id, .. } | Pgoutput::Delete { relation_id, .. } => *relation_id,
            _ => return String::new(),
        };
        self.relations.get(&relation_id).map(|(_, name)| name.clone()).unwrap_or_default()
    }

    fn record_lag(&mut self, commit_ts_micros: i64) {
        let commit_ts = pg_micros_to_datetime(commit_ts_micros);
        let lag_ms = (Utc::now() - commit_ts).num_milliseconds();
        metrics::REPLICATION_LAG_MS.set(lag_ms as f64);

        let exceeded = lag_ms.unsigned_abs() as i64 > self.config.alert_threshold_ms;
        if exceeded != self.lag_threshold_exceeded {
            self.lag_threshold_exceeded = exceeded;
            if exceeded {
                tracing::warn!(lag_ms, threshold_ms = self.config.alert_threshold_ms, "replication lag threshold exceeded");
            } else {
                tracing::info!(lag_ms, "replication lag back under threshold");
            }
        }
    }
}

/// Retry an async bring-up with exponential backoff, capped, for transient
/// connect failures. Stops retrying a `ReplicationError::Fatal`.
pub async fn backoff_delay(attempt: u32) -> Duration {
    let capped = attempt.min(6);
    Duration::from_millis(250u64 * 2u64.pow(capped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;

    struct FakeTransport {
        outgoing: Vec<String>,
        incoming: VecDeque<Bytes>,
        sent_copy: Vec<Vec<u8>>,
    }

    #[async_trait]
    impl ReplicationTransport for FakeTransport {
        async fn send_query(&mut self, sql: &str) -> std::io::Result<()> {
            self.outgoing.push(sql.to_string());
            Ok(())
        }
        async fn send_copy_data(&mut self, payload: &[u8]) -> std::io::Result<()> {
            self.sent_copy.push(payload.to_vec());
            Ok(())
        }
        async fn recv_copy_data(&mut self) -> std::io::Result<Option<Bytes>> {
            Ok(self.incoming.pop_front())
        }
    }

    fn keepalive(wal_end: u64, reply: bool) -> Bytes {
        let mut v = vec![b'k'];
        v.extend_from_slice(&wal_end.to_be_bytes());
        v.extend_from_slice(&0i64.to_be_bytes());
        v.push(u8::from(reply));
        Bytes::from(v)
    }

    #[tokio::test]
    async fn keepalive_with_reply_requested_sends_standby_status() {
        let transport = FakeTransport {
            outgoing: vec![],
            incoming: VecDeque::from([keepalive(10, true)]),
            sent_copy: vec![],
        };
        let pool = sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://localhost/does_not_matter").unwrap();
        let mut tailer = Tailer::new(
            pool,
            transport,
            TailerConfig {
                slot_name: "meridian_tailer".into(),
                publication_name: "meridian_pub".into(),
                tracked_tables: vec![],
                proto_version: 1,
                alert_threshold_ms: 5000,
            },
        );
        let mut tracker = LsnTracker::new();
        let result = tailer.next_change(&mut tracker).await.unwrap();
        assert!(result.is_none());
        assert_eq!(tailer.transport.sent_copy.len(), 1);
        assert_eq!(tailer.transport.sent_copy[0][0], b'r');
    }

    #[tokio::test]
    async fn keepalive_without_reply_requested_sends_nothing() {
        let transport = FakeTransport {
            outgoing: vec![],
            incoming: VecDeque::from([keepalive(10, false)]),
            sent_copy: vec![],
        };
        let pool = sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://localhost/does_not_matter").unwrap();
        let mut tailer = Tailer::new(
            pool,
            transport,
            TailerConfig {
                slot_name: "s".into(),
                publication_name: "p".into(),
                tracked_tables: vec![],
                proto_version: 1,
                alert_threshold_ms: 5000,
            },
        );
        let mut tracker = LsnTracker::new();
        tailer.next_change(&mut tracker).await.unwrap();
        assert!(tailer.transport.sent_copy.is_empty());
    }
}
