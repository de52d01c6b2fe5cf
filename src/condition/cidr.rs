//! CIDR membership checks for the `remote_ip` property.

use ipnet::IpNet;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("malformed CIDR literal")]
pub struct ParseError;

/// Parse every value as a CIDR, IPv4 or IPv6, rejecting the whole condition
/// if any single value is malformed.
pub fn parse_all(values: &[String]) -> Result<Vec<IpNet>, ParseError> {
    values.iter().map(|v| v.parse::<IpNet>().map_err(|_| ParseError)).collect()
}

#[must_use]
pub fn is_in_any(ip: IpAddr, nets: &[IpNet]) -> bool {
    nets.iter().any(|net| net.contains(&ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_ipv4_cidr() {
        let nets = parse_all(&["10.0.0.0/8".into()]).unwrap();
        assert!(is_in_any("10.1.2.3".parse().unwrap(), &nets));
        assert!(!is_in_any("192.168.0.1".parse().unwrap(), &nets));
    }

    #[test]
    fn matches_ipv6_cidr() {
        let nets = parse_all(&["2001:db8::/32".into()]).unwrap();
        assert!(is_in_any("2001:db8::1".parse().unwrap(), &nets));
    }

    #[test]
    fn rejects_malformed_literal() {
        assert!(parse_all(&["not-a-cidr".into()]).is_err());
    }
}
