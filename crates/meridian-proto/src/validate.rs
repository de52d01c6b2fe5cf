//! Resource-address validation and normalization (§8 boundary behaviors).
//!
//! DNS addresses accept the wildcard tokens `**` (any number of labels) and
//! `?` (exactly one label) but otherwise must be syntactically valid
//! hostnames; bare IP literals are rejected since those belong under the
//! `ip`/`cidr` kinds. IP and CIDR addresses are normalized to their
//! canonical text form with host bits zeroed and checked against a small
//! reserved/loopback denylist.

use ipnet::IpNet;
use std::net::IpAddr;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("hostname is empty")]
    EmptyHostname,
    #[error("hostname exceeds 253 characters")]
    HostnameTooLong,
    #[error("hostname carries a port suffix")]
    PortSuffix,
    #[error("hostname resolves to a bare ip literal")]
    BareIpLiteral,
    #[error("hostname contains an empty label")]
    EmptyLabel,
    #[error("hostname label is not a valid token")]
    InvalidLabel,
    #[error("address is not a valid ip or cidr")]
    InvalidCidr,
    #[error("address falls in a loopback or reserved range")]
    ReservedAddress,
}

/// A standard DNS label: 1-63 characters, alphanumeric or hyphen, not
/// starting or ending with a hyphen.
fn is_valid_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    if bytes.is_empty() || bytes.len() > 63 {
        return false;
    }
    if bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
        return false;
    }
    bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
}

/// Validate a DNS resource address, per §8: accepts `example.com`,
/// `**.example.com` (zero-or-more wildcard label) and `?.xn--fssq61j.com`
/// (exactly-one wildcard label); rejects bare IPs, leading/trailing/empty
/// labels, bare `*`, and port suffixes.
pub fn validate_hostname(input: &str) -> Result<(), ValidationError> {
    if input.is_empty() {
        return Err(ValidationError::EmptyHostname);
    }
    if input.len() > 253 {
        return Err(ValidationError::HostnameTooLong);
    }
    if input.contains(':') {
        return Err(ValidationError::PortSuffix);
    }
    if input.parse::<IpAddr>().is_ok() {
        return Err(ValidationError::BareIpLiteral);
    }
    for label in input.split('.') {
        if label.is_empty() {
            return Err(ValidationError::EmptyLabel);
        }
        if label == "**" || label == "?" {
            continue;
        }
        if !is_valid_label(label) {
            return Err(ValidationError::InvalidLabel);
        }
    }
    Ok(())
}

/// Normalize a CIDR/IP address to its canonical text form with host bits
/// zeroed. `192.168.1.1/24` normalizes to `192.168.1.0/24`;
/// `2607:f8b0:4012:0::200e/128` normalizes to `2607:f8b0:4012::200e/128`.
pub fn normalize_cidr(input: &str) -> Result<String, ValidationError> {
    let net: IpNet = input.parse().map_err(|_| ValidationError::InvalidCidr)?;
    let truncated = net.trunc();
    reject_reserved(truncated.addr())?;
    Ok(truncated.to_string())
}

/// Normalize a single IP address (the `ip` resource kind, not `cidr`) to
/// its canonical text form.
pub fn normalize_ip(input: &str) -> Result<String, ValidationError> {
    let addr: IpAddr = input.parse().map_err(|_| ValidationError::InvalidCidr)?;
    reject_reserved(addr)?;
    Ok(addr.to_string())
}

fn reject_reserved(addr: IpAddr) -> Result<(), ValidationError> {
    let reserved = match addr {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_unspecified()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                || (v4.octets()[0] & 0xf0) == 240 // 240.0.0.0/4 reserved for future use
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified() || v6.is_multicast(),
    };
    if reserved {
        Err(ValidationError::ReservedAddress)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_hostname() {
        assert!(validate_hostname("example.com").is_ok());
    }

    #[test]
    fn accepts_double_star_wildcard_label() {
        assert!(validate_hostname("**.example.com").is_ok());
    }

    #[test]
    fn accepts_question_mark_wildcard_with_punycode_label() {
        assert!(validate_hostname("?.xn--fssq61j.com").is_ok());
    }

    #[test]
    fn rejects_bare_ip_literal() {
        assert_eq!(validate_hostname("1.1.1.1"), Err(ValidationError::BareIpLiteral));
    }

    #[test]
    fn rejects_leading_dot() {
        assert_eq!(validate_hostname(".foo.com"), Err(ValidationError::EmptyLabel));
    }

    #[test]
    fn rejects_double_dot() {
        assert_eq!(validate_hostname("foo..com"), Err(ValidationError::EmptyLabel));
    }

    #[test]
    fn rejects_bare_star_wildcard() {
        assert_eq!(validate_hostname("*.com"), Err(ValidationError::InvalidLabel));
    }

    #[test]
    fn rejects_port_suffix() {
        assert_eq!(validate_hostname("example.com:80"), Err(ValidationError::PortSuffix));
    }

    #[test]
    fn normalizes_ipv4_cidr_host_bits() {
        assert_eq!(normalize_cidr("192.168.1.1/24").unwrap(), "192.168.1.0/24");
    }

    #[test]
    fn normalizes_ipv6_cidr_to_canonical_form() {
        assert_eq!(normalize_cidr("2607:f8b0:4012:0::200e/128").unwrap(), "2607:f8b0:4012::200e/128");
    }

    #[test]
    fn rejects_loopback_cidr() {
        assert_eq!(normalize_cidr("127.0.0.1/32"), Err(ValidationError::ReservedAddress));
    }
}
