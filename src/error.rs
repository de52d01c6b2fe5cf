//! Unified error taxonomy for the control plane.
//!
//! Split the same way the protocol itself is: errors that cross a client or
//! gateway channel carry an `error_code()` and a `to_*_reply()` conversion to
//! a wire event, while internal/db errors stay as plain `thiserror` enums.

use meridian_proto::event::{ClientEvent, GatewayEvent};
use meridian_proto::ResourceId;
use thiserror::Error;

/// Errors surfaced by the per-client authorization cache (C5/C6).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CacheError {
    #[error("resource not found: {0}")]
    NotFound(ResourceId),
    #[error("access forbidden: {violated:?}")]
    Forbidden { violated: Vec<String> },
}

impl CacheError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden { .. } => "forbidden",
        }
    }

    /// Render the client-facing reject for a failed `connect_to_resource`.
    #[must_use]
    pub fn to_client_reply(&self, resource_id: ResourceId) -> ClientEvent {
        ClientEvent::RejectAccess { resource_id }
    }

    /// Render the gateway-facing reject for a flow that no longer holds.
    #[must_use]
    pub fn to_gateway_reply(&self, client_id: meridian_proto::ClientId, resource_id: ResourceId) -> GatewayEvent {
        GatewayEvent::RejectAccess { client_id, resource_id }
    }
}

/// Errors from signed opaque ref verification.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RefError {
    #[error("signed ref malformed or tampered")]
    InvalidRef,
}

/// Errors from the directory sync runner (C10).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("adapter token rejected")]
    Unauthorized,
    #[error("upstream returned a retryable error")]
    RetryLater,
    #[error("upstream returned an unexpected response shape: {0}")]
    InvalidResponse(String),
    #[error("mass-deletion circuit breaker is open")]
    CircuitOpen,
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl SyncError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::RetryLater => "retry_later",
            Self::InvalidResponse(_) => "invalid_response",
            Self::CircuitOpen => "circuit_open",
            Self::Transport(_) => "retry_later",
        }
    }
}

/// Errors from the replication tailer (C1). `LagExceeded` is an
/// observability event, not a fatal condition — the tailer keeps running.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("replication lag exceeded alert threshold: {lag_ms}ms")]
    LagExceeded { lag_ms: i64 },
    #[error("fatal replication error: {0}")]
    Fatal(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Database-layer errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("account not found: {0}")]
    AccountNotFound(uuid::Uuid),
    #[error("unique constraint violated on {0}")]
    Conflict(&'static str),
}
