//! Policy condition types: the wire/storage representation consumed by both
//! the database layer and the condition evaluator.

use crate::ids::ProviderId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    RemoteIp,
    RemoteIpLocationRegion,
    CurrentUtcDatetime,
    ProviderId,
    ClientVerified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    IsIn,
    IsNotIn,
    IsInCidr,
    IsNotInCidr,
    Is,
    IsNot,
    IsInDayOfWeekTimeRanges,
}

impl Operator {
    /// Whether `self` is a valid pairing for `property`, per the operator
    /// semantics table.
    #[must_use]
    pub fn valid_for(self, property: Property) -> bool {
        matches!(
            (property, self),
            (Property::RemoteIpLocationRegion, Operator::IsIn | Operator::IsNotIn)
                | (Property::RemoteIp, Operator::IsInCidr | Operator::IsNotInCidr)
                | (Property::ProviderId, Operator::IsIn | Operator::IsNotIn)
                | (Property::ClientVerified, Operator::Is | Operator::IsNot)
                | (Property::CurrentUtcDatetime, Operator::IsInDayOfWeekTimeRanges)
        )
    }
}

/// A single condition clause on a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub property: Property,
    pub operator: Operator,
    pub values: Vec<String>,
}

impl Condition {
    #[must_use]
    pub fn new(property: Property, operator: Operator, values: Vec<String>) -> Option<Self> {
        if operator.valid_for(property) {
            Some(Self { property, operator, values })
        } else {
            None
        }
    }
}

/// The client-context facts a condition is evaluated against.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub remote_ip: std::net::IpAddr,
    pub remote_region: Option<String>,
    pub provider_id: Option<ProviderId>,
    pub client_verified: bool,
    pub now: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_property_pairing_is_checked() {
        assert!(Operator::IsInCidr.valid_for(Property::RemoteIp));
        assert!(!Operator::IsInCidr.valid_for(Property::ClientVerified));
        assert!(Condition::new(Property::ClientVerified, Operator::IsInCidr, vec![]).is_none());
    }

    #[test]
    fn valid_condition_constructs() {
        let c = Condition::new(
            Property::RemoteIpLocationRegion,
            Operator::IsIn,
            vec!["US".into(), "CA".into()],
        );
        assert!(c.is_some());
    }
}
