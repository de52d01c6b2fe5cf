//! Resource types shared between the database layer, the caches, and the
//! client/gateway wire protocol.

use crate::ids::{GatewayGroupId, ResourceId};
use crate::validate::{self, ValidationError};
use serde::{Deserialize, Serialize};

/// What kind of address a resource resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Dns,
    Ip,
    Cidr,
    /// The synthetic "internet" resource. At most one per account.
    Internet,
}

/// Which address families a DNS resource should resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpStack {
    Ipv4Only,
    Ipv6Only,
    Dual,
}

/// A single protocol/port filter entry on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub protocol: Protocol,
    /// Empty means "all ports".
    #[serde(default)]
    pub ports: Vec<PortRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    #[must_use]
    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }
}

/// A resource's immutable breaking-change fields: type, address, filters.
/// Any mutation to these fields is a delete+recreate per the resource's
/// `persistent_id`, not an in-place update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAddress {
    pub kind: ResourceKind,
    /// `None` only for `ResourceKind::Internet`.
    pub address: Option<String>,
    pub ip_stack: Option<IpStack>,
    pub filters: Vec<Filter>,
}

impl ResourceAddress {
    /// Validate `address` against its `kind` (§8) and, for `ip`/`cidr`,
    /// normalize it to canonical form with host bits zeroed. `dns` and
    /// `internet` addresses are returned unchanged (hostnames are not
    /// rewritten, only validated).
    pub fn validated(mut self) -> Result<Self, ValidationError> {
        match self.kind {
            ResourceKind::Internet => {
                self.address = None;
            }
            ResourceKind::Dns => {
                let address = self.address.as_deref().ok_or(ValidationError::EmptyHostname)?;
                validate::validate_hostname(address)?;
            }
            ResourceKind::Ip => {
                let address = self.address.as_deref().ok_or(ValidationError::InvalidCidr)?;
                self.address = Some(validate::normalize_ip(address)?);
            }
            ResourceKind::Cidr => {
                let address = self.address.as_deref().ok_or(ValidationError::InvalidCidr)?;
                self.address = Some(validate::normalize_cidr(address)?);
            }
        }
        Ok(self)
    }
}

/// The resource record as persisted and as loaded into a client cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    /// Stable across breaking updates (delete + recreate).
    pub persistent_id: ResourceId,
    pub name: String,
    pub address: ResourceAddress,
    pub gateway_groups: Vec<GatewayGroupId>,
}

/// The version-trimmed view of a resource pushed to a specific client.
///
/// Fields are gracefully dropped for clients whose `last_seen_version`
/// predates them, per §4.5's "version-compatible" connectability rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceView {
    pub id: ResourceId,
    pub name: String,
    pub address: Option<String>,
    /// Human-facing description of the address (e.g. for the internet
    /// resource or a CIDR block). Omitted for clients on versions that
    /// predate it.
    pub address_description: Option<String>,
    pub ip_stack: Option<IpStack>,
    pub kind: ResourceKind,
    pub filters: Vec<Filter>,
    pub gateway_groups: Vec<GatewayGroupId>,
}

impl ResourceView {
    /// Trim fields a client on `version` wouldn't understand. Versions are
    /// compared as simple `(major, minor)` pairs; unknown/missing version
    /// is treated as the oldest supported baseline.
    #[must_use]
    pub fn for_client_version(mut self, version: Option<(u16, u16)>) -> Self {
        const ADDRESS_DESCRIPTION_SINCE: (u16, u16) = (1, 1);
        if version.unwrap_or((0, 0)) < ADDRESS_DESCRIPTION_SINCE {
            self.address_description = None;
        }
        self
    }
}

impl From<&Resource> for ResourceView {
    fn from(r: &Resource) -> Self {
        let address_description = match r.address.kind {
            ResourceKind::Internet => Some("All internet traffic".to_string()),
            ResourceKind::Cidr | ResourceKind::Ip => r.address.address.clone(),
            ResourceKind::Dns => None,
        };
        Self {
            id: r.id,
            name: r.name.clone(),
            address: r.address.address.clone(),
            address_description,
            ip_stack: r.address.ip_stack,
            kind: r.address.kind,
            filters: r.address.filters.clone(),
            gateway_groups: r.gateway_groups.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dns_resource() -> Resource {
        Resource {
            id: ResourceId::new(),
            persistent_id: ResourceId::new(),
            name: "app".into(),
            address: ResourceAddress {
                kind: ResourceKind::Dns,
                address: Some("app.example.com".into()),
                ip_stack: Some(IpStack::Dual),
                filters: vec![],
            },
            gateway_groups: vec![GatewayGroupId::new()],
        }
    }

    #[test]
    fn dns_resource_has_no_address_description() {
        let view = ResourceView::from(&dns_resource());
        assert_eq!(view.address_description, None);
    }

    #[test]
    fn internet_resource_has_synthetic_description() {
        let mut r = dns_resource();
        r.address.kind = ResourceKind::Internet;
        r.address.address = None;
        let view = ResourceView::from(&r);
        assert_eq!(view.address_description.as_deref(), Some("All internet traffic"));
    }

    #[test]
    fn old_client_version_drops_address_description() {
        let mut r = dns_resource();
        r.address.kind = ResourceKind::Cidr;
        r.address.address = Some("10.0.0.0/24".into());
        let view = ResourceView::from(&r).for_client_version(Some((1, 0)));
        assert_eq!(view.address_description, None);
    }

    #[test]
    fn cidr_address_is_normalized_on_validate() {
        let mut r = dns_resource();
        r.address.kind = ResourceKind::Cidr;
        r.address.address = Some("192.168.1.1/24".into());
        let validated = r.address.validated().unwrap();
        assert_eq!(validated.address.as_deref(), Some("192.168.1.0/24"));
    }

    #[test]
    fn bare_ip_literal_is_rejected_for_dns_kind() {
        let mut r = dns_resource();
        r.address.address = Some("1.1.1.1".into());
        assert!(r.address.validated().is_err());
    }

    #[test]
    fn port_range_contains() {
        let range = PortRange { start: 80, end: 443 };
        assert!(range.contains(443));
        assert!(!range.contains(8080));
    }
}
