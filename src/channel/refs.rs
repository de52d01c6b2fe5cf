//! Signed opaque refs binding a client channel's in-flight flow-setup to
//! the gateway's reply, so a gateway can't forge or replay against a
//! different session. §4.8/§4.9.

use crate::error::RefError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use meridian_proto::{ClientId, ResourceId};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

const CONTEXT: &[u8] = b"gateway_reply_ref";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayReplyRef {
    pub channel_id: ClientId,
    pub socket_ref: String,
    pub resource_id: ResourceId,
    pub preshared_key: String,
    pub ice_username: String,
    pub ice_password: String,
}

/// Serialize and HMAC-sign a ref into an opaque, URL-safe string.
pub fn sign(body: &GatewayReplyRef, key: &[u8]) -> String {
    let payload = serde_json::to_vec(body).expect("ref body always serializes");
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(CONTEXT);
    mac.update(&payload);
    let tag = mac.finalize().into_bytes();

    let mut out = Vec::with_capacity(payload.len() + tag.len() + 8);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&tag);
    URL_SAFE_NO_PAD.encode(out)
}

/// Verify and decode a ref produced by [`sign`]. Rejects truncated,
/// malformed, or tampered input.
pub fn verify(token: &str, key: &[u8]) -> Result<GatewayReplyRef, RefError> {
    let raw = URL_SAFE_NO_PAD.decode(token).map_err(|_| RefError::InvalidRef)?;
    if raw.len() < 4 {
        return Err(RefError::InvalidRef);
    }
    let payload_len = u32::from_be_bytes(raw[0..4].try_into().unwrap()) as usize;
    if raw.len() < 4 + payload_len + 32 {
        return Err(RefError::InvalidRef);
    }
    let payload = &raw[4..4 + payload_len];
    let tag = &raw[4 + payload_len..4 + payload_len + 32];

    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(CONTEXT);
    mac.update(payload);
    mac.verify_slice(tag).map_err(|_| RefError::InvalidRef)?;

    serde_json::from_slice(payload).map_err(|_| RefError::InvalidRef)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GatewayReplyRef {
        GatewayReplyRef {
            channel_id: ClientId::new(),
            socket_ref: "abc123".into(),
            resource_id: ResourceId::new(),
            preshared_key: "psk".into(),
            ice_username: "u".into(),
            ice_password: "p".into(),
        }
    }

    #[test]
    fn signed_ref_roundtrips() {
        let key = b"0123456789abcdef0123456789abcdef";
        let body = sample();
        let token = sign(&body, key);
        let decoded = verify(&token, key).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn tampered_ref_is_rejected() {
        let key = b"0123456789abcdef0123456789abcdef";
        let mut token = sign(&sample(), key);
        token.push('x');
        assert!(verify(&token, key).is_err());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let token = sign(&sample(), b"0123456789abcdef0123456789abcdef");
        assert!(verify(&token, b"ffffffffffffffffffffffffffffffff").is_err());
    }
}
