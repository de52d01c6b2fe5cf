//! Relay persistence (global and account-scoped).

use crate::db::Database;
use crate::error::DbError;
use meridian_proto::relay::Relay;
use meridian_proto::{AccountId, RelayId};

#[derive(Debug, Clone, sqlx::FromRow)]
struct RelayRow {
    id: uuid::Uuid,
    account_id: Option<uuid::Uuid>,
    ipv4: Option<String>,
    ipv6: Option<String>,
    stamp_secret: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl RelayRow {
    fn into_domain(self) -> Relay {
        Relay {
            id: RelayId(self.id),
            account_id: self.account_id.map(AccountId),
            ipv4: self.ipv4.and_then(|s| s.parse().ok()),
            ipv6: self.ipv6.and_then(|s| s.parse().ok()),
            stamp_secret: self.stamp_secret,
            coords: match (self.latitude, self.longitude) {
                (Some(lat), Some(lon)) => Some((lat, lon)),
                _ => None,
            },
        }
    }
}

pub struct RelayRepository<'a> {
    db: &'a Database,
}

impl<'a> RelayRepository<'a> {
    pub(super) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Global relays plus any scoped to `account_id`.
    pub async fn available_for_account(&self, account_id: AccountId) -> Result<Vec<Relay>, DbError> {
        let rows = sqlx::query_as::<_, RelayRow>(
            "SELECT * FROM relays WHERE account_id IS NULL OR account_id = $1",
        )
        .bind(account_id.0)
        .fetch_all(self.db.replica())
        .await?;
        Ok(rows.into_iter().map(RelayRow::into_domain).collect())
    }
}
