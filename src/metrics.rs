//! Prometheus metrics for the control plane's own operational state.

use lazy_static::lazy_static;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref REPLICATION_LAG_MS: Gauge =
        Gauge::new("meridian_replication_lag_ms", "Replication lag in milliseconds").unwrap();

    pub static ref REPLICATION_EVENTS_TOTAL: IntCounter = IntCounter::new(
        "meridian_replication_events_total",
        "Row-change events decoded from the replication stream"
    ).unwrap();

    pub static ref CACHE_RECOMPUTES_TOTAL: IntCounter = IntCounter::new(
        "meridian_cache_recomputes_total",
        "Client cache recomputations triggered by a change event"
    ).unwrap();

    pub static ref ACTIVE_GATEWAY_AUTHORIZATIONS: IntGauge = IntGauge::new(
        "meridian_active_gateway_authorizations",
        "Currently active policy authorizations held in the gateway cache"
    ).unwrap();

    pub static ref DIRECTORY_SYNC_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "meridian_directory_sync_failures_total",
        "Consecutive directory sync adapter failures"
    ).unwrap();

    pub static ref CONNECTED_CLIENTS: IntGauge =
        IntGauge::new("meridian_connected_clients", "Currently connected clients").unwrap();

    pub static ref CONNECTED_GATEWAYS: IntGauge =
        IntGauge::new("meridian_connected_gateways", "Currently connected gateways").unwrap();
}

/// Register every metric. Must run once at startup before anything records.
pub fn init() {
    REGISTRY.register(Box::new(REPLICATION_LAG_MS.clone())).unwrap();
    REGISTRY.register(Box::new(REPLICATION_EVENTS_TOTAL.clone())).unwrap();
    REGISTRY.register(Box::new(CACHE_RECOMPUTES_TOTAL.clone())).unwrap();
    REGISTRY.register(Box::new(ACTIVE_GATEWAY_AUTHORIZATIONS.clone())).unwrap();
    REGISTRY.register(Box::new(DIRECTORY_SYNC_FAILURES_TOTAL.clone())).unwrap();
    REGISTRY.register(Box::new(CONNECTED_CLIENTS.clone())).unwrap();
    REGISTRY.register(Box::new(CONNECTED_GATEWAYS.clone())).unwrap();
}

pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
