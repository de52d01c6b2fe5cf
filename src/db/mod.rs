//! Persistence layer: a pooled Postgres primary (writes, and reads outside
//! cache hydration) plus an optional read-replica pool used exclusively for
//! cache hydration, per §5 ("all cache hydration uses the replica").

mod accounts;
mod actors;
mod change_log;
mod policies;
mod relays;
mod resources;

pub use accounts::AccountRepository;
pub use actors::{membership_id, ActorRepository, GroupRepository};
pub use change_log::{ChangeLogRepository, ChangeOp};
pub use policies::PolicyRepository;
pub use relays::RelayRepository;
pub use resources::{GatewayRepository, ResourceRepository};

use crate::error::DbError;
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::Pool;
use std::time::Duration;

#[derive(Clone)]
pub struct Database {
    primary: Pool<Postgres>,
    replica: Pool<Postgres>,
}

impl Database {
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    pub async fn connect(primary_url: &str, replica_url: Option<&str>, max_connections: u32) -> Result<Self, DbError> {
        let primary = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .idle_timeout(Some(Self::IDLE_TIMEOUT))
            .connect(primary_url)
            .await?;

        let replica = match replica_url {
            Some(url) if url != primary_url => {
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                    .idle_timeout(Some(Self::IDLE_TIMEOUT))
                    .connect(url)
                    .await?
            }
            _ => primary.clone(),
        };

        tracing::info!("database connected");
        Ok(Self { primary, replica })
    }

    /// Pool for writes and transactional reads.
    pub fn primary(&self) -> &Pool<Postgres> {
        &self.primary
    }

    /// Pool used exclusively by cache hydration paths.
    pub fn replica(&self) -> &Pool<Postgres> {
        &self.replica
    }

    pub fn accounts(&self) -> AccountRepository<'_> {
        AccountRepository::new(self)
    }

    pub fn actors(&self) -> ActorRepository<'_> {
        ActorRepository::new(self)
    }

    pub fn groups(&self) -> GroupRepository<'_> {
        GroupRepository::new(self)
    }

    pub fn resources(&self) -> ResourceRepository<'_> {
        ResourceRepository::new(self)
    }

    pub fn gateways(&self) -> GatewayRepository<'_> {
        GatewayRepository::new(self)
    }

    pub fn relays(&self) -> RelayRepository<'_> {
        RelayRepository::new(self)
    }

    pub fn policies(&self) -> PolicyRepository<'_> {
        PolicyRepository::new(self)
    }

    pub fn change_log(&self) -> ChangeLogRepository<'_> {
        ChangeLogRepository::new(self)
    }

    /// Test-only constructor for wiring a `Database` around pools that
    /// were never connected (e.g. `connect_lazy`), so unit tests outside
    /// this module can exercise code paths that hold a `Database` but
    /// never issue a query.
    #[cfg(test)]
    pub(crate) fn from_pools(primary: Pool<Postgres>, replica: Pool<Postgres>) -> Self {
        Self { primary, replica }
    }

    /// Run the embedded schema migration, skipping tables that already
    /// exist (mirrors the table-presence check used for incremental
    /// migrations rather than a version-tracked migration runner).
    pub async fn migrate(&self) -> Result<(), DbError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = 'accounts')",
        )
        .fetch_one(&self.primary)
        .await?;

        if !exists {
            sqlx::raw_sql(include_str!("../../migrations/0001_init.sql"))
                .execute(&self.primary)
                .await?;
            tracing::info!("applied migration 0001_init");
        }

        Ok(())
    }
}
