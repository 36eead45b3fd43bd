//! Destination endpoints
//!
//! An [`Endpoint`] names where a connection ultimately wants to go: a host
//! (domain name or IP literal) plus a port, tagged with the address family
//! so the router can decide which predicates apply without resolving
//! anything.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use crate::error::HttpError;

/// Address family of an endpoint host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    /// DNS name, needs resolution before IP predicates can apply
    Domain,
    /// IPv4 literal
    Ipv4,
    /// IPv6 literal
    Ipv6,
}

/// A destination address: host plus port, immutable after construction
///
/// # Example
///
/// ```
/// use hopgate::endpoint::{Endpoint, HostKind};
///
/// let ep = Endpoint::new("example.com", 443);
/// assert_eq!(ep.kind(), HostKind::Domain);
///
/// let ep = Endpoint::new("1.1.1.1", 53);
/// assert_eq!(ep.kind(), HostKind::Ipv4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    kind: HostKind,
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint, classifying the host as domain or IP literal
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let kind = if host.parse::<Ipv4Addr>().is_ok() {
            HostKind::Ipv4
        } else if host.parse::<Ipv6Addr>().is_ok() {
            HostKind::Ipv6
        } else {
            HostKind::Domain
        };
        Self { kind, host, port }
    }

    /// Parse a `host[:port]` authority string
    ///
    /// Handles bracketed IPv6 (`[::1]:8080`). A missing port defaults to 80.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::BadProtocol`] on an empty host or an
    /// unparseable port.
    ///
    /// # Example
    ///
    /// ```
    /// use hopgate::endpoint::{Endpoint, HostKind};
    ///
    /// let ep = Endpoint::parse_authority("example.com:443").unwrap();
    /// assert_eq!(ep.host(), "example.com");
    /// assert_eq!(ep.port(), 443);
    ///
    /// let ep = Endpoint::parse_authority("[::1]:8080").unwrap();
    /// assert_eq!(ep.kind(), HostKind::Ipv6);
    /// ```
    pub fn parse_authority(s: &str) -> Result<Self, HttpError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(HttpError::bad_protocol("empty authority"));
        }

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            // Bracketed IPv6: [addr] or [addr]:port
            let end = rest
                .find(']')
                .ok_or_else(|| HttpError::bad_protocol(format!("unterminated IPv6 host: {s}")))?;
            let host = &rest[..end];
            match &rest[end + 1..] {
                "" => (host, 80),
                tail => {
                    let port = tail
                        .strip_prefix(':')
                        .and_then(|p| p.parse::<u16>().ok())
                        .ok_or_else(|| HttpError::bad_protocol(format!("bad port in {s}")))?;
                    (host, port)
                }
            }
        } else if let Some((host, port_str)) = s.rsplit_once(':') {
            if host.contains(':') {
                // Bare IPv6 literal without brackets, no port part
                (s, 80)
            } else {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| HttpError::bad_protocol(format!("bad port in {s}")))?;
                (host, port)
            }
        } else {
            (s, 80)
        };

        if host.is_empty() {
            return Err(HttpError::bad_protocol(format!("empty host in {s}")));
        }
        Ok(Self::new(host, port))
    }

    /// Address family tag
    #[must_use]
    pub const fn kind(&self) -> HostKind {
        self.kind
    }

    /// Host text (domain name or IP literal)
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Destination port
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Authority form used on the wire (`host:port`, bracketed for IPv6)
    #[must_use]
    pub fn authority(&self) -> String {
        match self.kind {
            HostKind::Ipv6 => format!("[{}]:{}", self.host, self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.authority())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_domain() {
        assert_eq!(Endpoint::new("example.com", 80).kind(), HostKind::Domain);
        assert_eq!(Endpoint::new("localhost", 80).kind(), HostKind::Domain);
    }

    #[test]
    fn test_classify_ip_literals() {
        assert_eq!(Endpoint::new("10.0.0.1", 80).kind(), HostKind::Ipv4);
        assert_eq!(Endpoint::new("fd00::1", 80).kind(), HostKind::Ipv6);
        assert_eq!(Endpoint::new("::ffff:1.1.1.1", 80).kind(), HostKind::Ipv6);
    }

    #[test]
    fn test_parse_authority_with_port() {
        let ep = Endpoint::parse_authority("example.com:443").unwrap();
        assert_eq!(ep.host(), "example.com");
        assert_eq!(ep.port(), 443);
        assert_eq!(ep.kind(), HostKind::Domain);
    }

    #[test]
    fn test_parse_authority_default_port() {
        let ep = Endpoint::parse_authority("example.com").unwrap();
        assert_eq!(ep.port(), 80);
    }

    #[test]
    fn test_parse_authority_ipv6() {
        let ep = Endpoint::parse_authority("[fd00::1]:8080").unwrap();
        assert_eq!(ep.host(), "fd00::1");
        assert_eq!(ep.port(), 8080);
        assert_eq!(ep.kind(), HostKind::Ipv6);

        let ep = Endpoint::parse_authority("[::1]").unwrap();
        assert_eq!(ep.port(), 80);
    }

    #[test]
    fn test_parse_authority_rejects_garbage() {
        assert!(Endpoint::parse_authority("").is_err());
        assert!(Endpoint::parse_authority(":443").is_err());
        assert!(Endpoint::parse_authority("example.com:notaport").is_err());
        assert!(Endpoint::parse_authority("[fd00::1").is_err());
    }

    #[test]
    fn test_authority_roundtrip() {
        assert_eq!(Endpoint::new("example.com", 443).authority(), "example.com:443");
        assert_eq!(Endpoint::new("fd00::1", 443).authority(), "[fd00::1]:443");
    }
}
