//! Protocol-level errors: malformed refs and envelope decode failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("signed ref malformed or tampered")]
    InvalidRef,
    #[error("envelope decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}
