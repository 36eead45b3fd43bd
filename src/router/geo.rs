//! Country lookup for IP-based rules
//!
//! The router consults a [`GeoReader`] when a rule constrains on country.
//! [`CountryDb`] is the file-backed implementation: a JSON object mapping
//! ISO 3166 alpha-2 codes to CIDR lists, loaded once at startup and
//! immutable afterwards, so concurrent readers need no locking.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use ipnet::IpNet;
use tracing::info;

use crate::error::RouteError;

/// Country lookup by IP
///
/// An absent entry means "no match" for the country predicate, never an
/// error. Implementations must be safe for concurrent reads.
pub trait GeoReader: Send + Sync {
    /// ISO 3166 alpha-2 code for `ip`, if known
    fn country(&self, ip: IpAddr) -> Option<&str>;
}

/// A reader that knows nothing; every country predicate fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeo;

impl GeoReader for NoGeo {
    fn country(&self, _ip: IpAddr) -> Option<&str> {
        None
    }
}

/// CIDR-table country database
#[derive(Debug, Default)]
pub struct CountryDb {
    entries: Vec<(IpNet, String)>,
}

impl CountryDb {
    /// Load from a JSON file shaped `{"AU": ["1.0.0.0/8", ...], ...}`
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::GeoDatabase`] when the file cannot be read,
    /// parsed, or contains an invalid CIDR.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RouteError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RouteError::geo(format!("{}: {e}", path.display())))?;
        let table: HashMap<String, Vec<String>> = serde_json::from_str(&contents)
            .map_err(|e| RouteError::geo(format!("{}: {e}", path.display())))?;

        let db = Self::from_table(table.iter().map(|(code, nets)| {
            (code.as_str(), nets.iter().map(String::as_str))
        }))?;
        info!(path = %path.display(), entries = db.entries.len(), "country database loaded");
        Ok(db)
    }

    /// Build from in-memory `(code, cidrs)` pairs
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::GeoDatabase`] on an invalid CIDR.
    pub fn from_table<'a, I, N>(table: I) -> Result<Self, RouteError>
    where
        I: IntoIterator<Item = (&'a str, N)>,
        N: IntoIterator<Item = &'a str>,
    {
        let mut entries = Vec::new();
        for (code, nets) in table {
            let code = code.to_ascii_uppercase();
            for net in nets {
                let net = net
                    .parse::<IpNet>()
                    .map_err(|_| RouteError::geo(format!("invalid CIDR for {code}: {net}")))?;
                entries.push((net, code.clone()));
            }
        }
        Ok(Self { entries })
    }
}

impl GeoReader for CountryDb {
    fn country(&self, ip: IpAddr) -> Option<&str> {
        let ip = canonical_ip(ip);
        self.entries
            .iter()
            .find(|(net, _)| net.contains(&ip))
            .map(|(_, code)| code.as_str())
    }
}

/// Reduce IPv4-mapped IPv6 addresses to their embedded IPv4
///
/// Range and country predicates must treat `::ffff:a.b.c.d` exactly like
/// `a.b.c.d`.
pub(crate) fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> CountryDb {
        CountryDb::from_table([
            ("au", ["1.1.0.0/16"].into_iter()),
            ("US", ["8.8.8.0/24"].into_iter()),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup() {
        let db = db();
        assert_eq!(db.country("1.1.1.1".parse().unwrap()), Some("AU"));
        assert_eq!(db.country("8.8.8.8".parse().unwrap()), Some("US"));
        assert_eq!(db.country("9.9.9.9".parse().unwrap()), None);
    }

    #[test]
    fn test_lookup_mapped_v6() {
        let db = db();
        assert_eq!(db.country("::ffff:1.1.1.1".parse().unwrap()), Some("AU"));
        assert_eq!(db.country("::ffff:9.9.9.9".parse().unwrap()), None);
    }

    #[test]
    fn test_invalid_cidr_rejected() {
        let result = CountryDb::from_table([("AU", ["not-a-cidr"].into_iter())]);
        assert!(matches!(result, Err(RouteError::GeoDatabase(_))));
    }

    #[test]
    fn test_canonical_ip() {
        let mapped: IpAddr = "::ffff:10.0.0.1".parse().unwrap();
        assert_eq!(canonical_ip(mapped), "10.0.0.1".parse::<IpAddr>().unwrap());

        let plain: IpAddr = "fd00::1".parse().unwrap();
        assert_eq!(canonical_ip(plain), plain);
    }

    #[test]
    fn test_no_geo() {
        assert_eq!(NoGeo.country("1.1.1.1".parse().unwrap()), None);
    }
}
