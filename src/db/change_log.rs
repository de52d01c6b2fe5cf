//! Change-log writer (C2): persists every decoded row event keyed by LSN.
//! Duplicate LSNs are silently skipped so a tailer restart replaying from
//! an old confirmed LSN doesn't error.

use crate::db::Database;
use crate::error::DbError;
use meridian_proto::AccountId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "change_op", rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub struct ChangeLogEntry {
    pub lsn: i64,
    pub account_id: AccountId,
    pub table: String,
    pub op: ChangeOp,
    pub old_data: Option<serde_json::Value>,
    pub data: Option<serde_json::Value>,
}

impl ChangeLogEntry {
    /// Validate the op/data invariant (also enforced at the schema level
    /// with a CHECK constraint, see migrations/0001_init.sql).
    pub fn is_well_formed(&self) -> bool {
        match self.op {
            ChangeOp::Insert => self.data.is_some() && self.old_data.is_none(),
            ChangeOp::Update => self.data.is_some() && self.old_data.is_some(),
            ChangeOp::Delete => self.data.is_none() && self.old_data.is_some(),
        }
    }

    /// Build a change-log row from a decoded replication event, skipping
    /// frames that carry no row data (begin/commit/relation) and events
    /// whose row doesn't carry an `account_id` column.
    #[must_use]
    pub fn from_row_change(raw: &crate::replication::RowChange) -> Option<Self> {
        use crate::replication::frame::Pgoutput;
        let (op, old_data, data) = match &raw.payload {
            Pgoutput::Insert { tuple, .. } => (ChangeOp::Insert, None, Some(tuple.clone())),
            Pgoutput::Update { old, new, .. } => (ChangeOp::Update, old.clone(), Some(new.clone())),
            Pgoutput::Delete { old, .. } => (ChangeOp::Delete, Some(old.clone()), None),
            _ => return None,
        };
        let account_id = data
            .as_ref()
            .or(old_data.as_ref())?
            .get("account_id")?
            .as_str()
            .and_then(|s| s.parse().ok())
            .map(AccountId)?;

        Some(Self { lsn: raw.lsn.0 as i64, account_id, table: raw.table.clone(), op, old_data, data })
    }
}

pub struct ChangeLogRepository<'a> {
    db: &'a Database,
}

impl<'a> ChangeLogRepository<'a> {
    pub(super) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn insert(&self, entry: &ChangeLogEntry) -> Result<(), DbError> {
        debug_assert!(entry.is_well_formed(), "malformed change log entry for lsn {}", entry.lsn);
        sqlx::query(
            "INSERT INTO change_logs (lsn, account_id, \"table\", op, old_data, data)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (lsn) DO NOTHING",
        )
        .bind(entry.lsn)
        .bind(entry.account_id.0)
        .bind(&entry.table)
        .bind(entry.op)
        .bind(&entry.old_data)
        .bind(&entry.data)
        .execute(self.db.primary())
        .await?;
        Ok(())
    }

    /// Remove entries older than `cutoff` for one account. Run as a
    /// periodic scheduled job, retention window from config.
    pub async fn truncate(&self, account_id: AccountId, cutoff: chrono::DateTime<chrono::Utc>) -> Result<u64, DbError> {
        let result = sqlx::query(
            "DELETE FROM change_logs WHERE account_id = $1 AND recorded_at < $2",
        )
        .bind(account_id.0)
        .bind(cutoff)
        .execute(self.db.primary())
        .await?;
        Ok(result.rows_affected())
    }

    /// Same as [`Self::truncate`] but across every account, for the
    /// process-wide retention sweep — cheaper than enumerating accounts
    /// first when the retention window is uniform.
    pub async fn truncate_all(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM change_logs WHERE recorded_at < $1")
            .bind(cutoff)
            .execute(self.db.primary())
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_requires_data_and_no_old_data() {
        let entry = ChangeLogEntry {
            lsn: 1,
            account_id: AccountId::new(),
            table: "resources".into(),
            op: ChangeOp::Insert,
            old_data: None,
            data: Some(serde_json::json!({"id": "x"})),
        };
        assert!(entry.is_well_formed());
    }

    #[test]
    fn delete_requires_old_data_and_no_data() {
        let entry = ChangeLogEntry {
            lsn: 2,
            account_id: AccountId::new(),
            table: "resources".into(),
            op: ChangeOp::Delete,
            old_data: Some(serde_json::json!({"id": "x"})),
            data: None,
        };
        assert!(entry.is_well_formed());
    }

    #[test]
    fn update_with_missing_old_data_is_malformed() {
        let entry = ChangeLogEntry {
            lsn: 3,
            account_id: AccountId::new(),
            table: "resources".into(),
            op: ChangeOp::Update,
            old_data: None,
            data: Some(serde_json::json!({"id": "x"})),
        };
        assert!(!entry.is_well_formed());
    }
}
