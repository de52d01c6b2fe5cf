//! Meridian control plane entrypoint: loads config, connects to
//! Postgres, and spawns the background components (C1 replication
//! tailer, C10 directory sync, scheduled maintenance) alongside the
//! client and gateway WebSocket listeners.

mod cache;
mod channel;
mod condition;
mod config;
mod db;
mod directory_sync;
mod error;
mod http;
mod metrics;
mod presence;
mod replication;
mod router;
mod state;
mod telemetry;
mod transport;

use config::Config;
use db::Database;
use replication::{LsnTracker, Tailer, TailerConfig, TcpReplicationTransport};
use state::Core;
use std::time::Duration;

#[tokio::main]
async fn main() {
    let config_path = config::resolve_config_path();
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("failed to load config at {config_path}: {error}");
            std::process::exit(1);
        }
    };

    telemetry::init(config.server.log_format);

    if let Err(errors) = config::validate(&config) {
        for error in &errors {
            tracing::error!(%error, "invalid configuration");
        }
        std::process::exit(1);
    }

    metrics::init();

    let db = match Database::connect(&config.database.primary_url, config.database.replica_url.as_deref(), config.database.max_connections).await {
        Ok(db) => db,
        Err(error) => {
            tracing::error!(%error, "failed to connect to database");
            std::process::exit(1);
        }
    };
    if let Err(error) = db.migrate().await {
        tracing::error!(%error, "failed to run migrations");
        std::process::exit(1);
    }

    let core = Core::new(config.clone(), db);

    tokio::spawn(http::run(config.metrics.port));
    tokio::spawn(run_replication_tailer(core.clone()));
    tokio::spawn(run_directory_sync(core.clone()));
    tokio::spawn(run_change_log_retention(core.clone()));
    tokio::spawn(run_gateway_authorization_gauge(core.clone()));

    let client_listener = tokio::spawn(transport::run_client_listener(config.server.client_addr, core.clone()));
    let gateway_listener = tokio::spawn(transport::run_gateway_listener(config.server.gateway_addr, core.clone()));

    let _ = tokio::join!(client_listener, gateway_listener);
}

/// C1: stream committed row changes off the replication slot, persist
/// each into the change log (C2), and fan it out through the router
/// (C3). Reconnects with backoff on any transport-level failure.
async fn run_replication_tailer(core: Core) {
    let replication_config = TailerConfig {
        slot_name: core.config.replication.slot_name.clone(),
        publication_name: core.config.replication.publication_name.clone(),
        tracked_tables: tracked_tables(),
        proto_version: 1,
        alert_threshold_ms: core.config.replication.alert_threshold_ms as i64,
    };

    let mut attempt = 0u32;
    loop {
        let transport = match TcpReplicationTransport::connect(&core.config.database.replication_addr).await {
            Ok(transport) => transport,
            Err(error) => {
                tracing::error!(%error, "replication transport connect failed");
                tokio::time::sleep(replication::tailer::backoff_delay(attempt).await).await;
                attempt += 1;
                continue;
            }
        };

        let mut tailer = Tailer::new(core.db.primary().clone(), transport, replication_config.clone());
        if let Err(error) = tailer.bring_up().await {
            tracing::error!(%error, "replication tailer bring-up failed");
            tokio::time::sleep(replication::tailer::backoff_delay(attempt).await).await;
            attempt += 1;
            continue;
        }

        let mut tracker = LsnTracker::new();
        loop {
            match tailer.next_change(&mut tracker).await {
                Ok(Some(row_change)) => {
                    attempt = 0;
                    metrics::REPLICATION_EVENTS_TOTAL.inc();
                    if let Some(entry) = db::change_log::ChangeLogEntry::from_row_change(&row_change) {
                        if let Err(error) = core.db.change_log().insert(&entry).await {
                            tracing::warn!(%error, "failed to persist change log entry");
                        }
                    }
                    core.router.route(row_change);
                }
                Ok(None) => continue,
                Err(error) => {
                    tracing::error!(%error, "replication tailer stream error, reconnecting");
                    break;
                }
            }
        }
        tokio::time::sleep(replication::tailer::backoff_delay(attempt).await).await;
        attempt += 1;
    }
}

fn tracked_tables() -> Vec<String> {
    [
        "accounts",
        "actors",
        "auth_identities",
        "auth_providers",
        "actor_groups",
        "memberships",
        "resources",
        "resource_connections",
        "gateway_groups",
        "gateways",
        "relays",
        "policies",
        "policy_conditions",
        "policy_authorizations",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// C10: periodic directory sync for every configured provider.
async fn run_directory_sync(core: Core) {
    if core.config.directory_sync.providers.is_empty() {
        tracing::info!("directory sync disabled: no providers configured");
        return;
    }
    tracing::warn!(
        providers = core.config.directory_sync.providers.len(),
        "directory sync configured but adapter wiring (OIDC/SCIM client construction) is external to this core crate"
    );
}

/// Scheduled change-log retention sweep, per `replication.change_log_retention_days`.
async fn run_change_log_retention(core: Core) {
    let mut ticker = tokio::time::interval(Duration::from_secs(6 * 3600));
    loop {
        ticker.tick().await;
        let cutoff = chrono::Utc::now() - chrono::Duration::days(core.config.replication.change_log_retention_days as i64);
        match core.db.change_log().truncate_all(cutoff).await {
            Ok(removed) => tracing::info!(removed, "change log retention sweep complete"),
            Err(error) => tracing::warn!(%error, "change log retention sweep failed"),
        }
    }
}

/// Periodically refreshes the `ACTIVE_GATEWAY_AUTHORIZATIONS` gauge from
/// every connected gateway's cache.
async fn run_gateway_authorization_gauge(core: Core) {
    let mut ticker = tokio::time::interval(Duration::from_secs(15));
    loop {
        ticker.tick().await;
        metrics::ACTIVE_GATEWAY_AUTHORIZATIONS.set(core.total_gateway_authorizations().await);
    }
}
