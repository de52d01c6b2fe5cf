//! The generic `{event, payload, ref}` envelope used by both the client and
//! gateway transports before the payload is dispatched to a typed
//! [`crate::event::ClientEvent`]/[`crate::event::GatewayEvent`] handler.
//!
//! Decoding happens in two steps because the `ref` field is optional and
//! orthogonal to which event variant is present; folding it into the
//! tagged enum directly would require every variant to carry it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(flatten)]
    pub body: T,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl<T> Envelope<T> {
    pub fn new(body: T) -> Self {
        Self { body, reference: None }
    }

    #[must_use]
    pub fn with_ref(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ClientRequest;
    use crate::ids::ResourceId;

    #[test]
    fn envelope_carries_optional_ref() {
        let body = ClientRequest::ConnectToResource { resource_id: ResourceId::new() };
        let env = Envelope::new(body).with_ref("abc123");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["ref"], "abc123");
        assert_eq!(json["event"], "connect_to_resource");
    }

    #[test]
    fn missing_ref_is_omitted() {
        let body = ClientRequest::ConnectToResource { resource_id: ResourceId::new() };
        let env = Envelope::new(body);
        let json = serde_json::to_value(&env).unwrap();
        assert!(json.get("ref").is_none());
    }
}
