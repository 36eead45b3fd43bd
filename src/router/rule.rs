//! Rule and route types
//!
//! A [`Rule`] is a named conjunction of optional predicate sets; an empty
//! set leaves that dimension unconstrained. Rules arrive from
//! configuration or the management surface as plain data and are compiled
//! (CIDRs parsed, patterns built, sets indexed) before the router will
//! hold them.

use std::collections::HashSet;
use std::fmt;

use ipnet::IpNet;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RouteError;

/// Kinds of adapters a connection can enter or leave through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// HTTP proxy (CONNECT and relay)
    Http,
    /// SOCKS5 proxy
    Socks5,
    /// Shadowsocks
    Shadowsocks,
    /// Fixed-destination tunnel
    Tunnel,
    /// Outbound-only: connect straight to the destination
    Direct,
    /// Outbound-only: refuse the connection
    Reject,
}

impl AdapterKind {
    /// Whether this kind never accepts client traffic
    ///
    /// Outbound-only kinds cannot appear in a rule's ingress-kind
    /// constraint.
    #[must_use]
    pub const fn is_outbound_only(self) -> bool {
        matches!(self, Self::Direct | Self::Reject)
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Socks5 => write!(f, "socks5"),
            Self::Shadowsocks => write!(f, "shadowsocks"),
            Self::Tunnel => write!(f, "tunnel"),
            Self::Direct => write!(f, "direct"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// A named predicate bundle selecting an egress
///
/// Every populated dimension must match for the rule to match. An omitted
/// `egress` selects `direct`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    /// Egress selected when this rule matches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub egress: Option<String>,

    /// CIDR ranges the destination IP must fall into
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ranges: Vec<String>,

    /// Ingress names the connection must have entered through
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ingresses: Vec<String>,

    /// Ingress adapter kinds the connection must have entered through
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ingress_kinds: Vec<AdapterKind>,

    /// Anchored patterns applied to the destination host
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,

    /// Domain suffixes the destination host must end with
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,

    /// Two-letter country codes the destination IP must geolocate to
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub countries: Vec<String>,
}

impl Rule {
    /// Rule selecting `egress` with no constraints
    #[must_use]
    pub fn to_egress(egress: impl Into<String>) -> Self {
        Self {
            egress: Some(egress.into()),
            ..Self::default()
        }
    }

    /// Constrain on CIDR ranges
    #[must_use]
    pub fn with_ranges<I: IntoIterator<Item = T>, T: Into<String>>(mut self, ranges: I) -> Self {
        self.ranges = ranges.into_iter().map(Into::into).collect();
        self
    }

    /// Constrain on ingress names
    #[must_use]
    pub fn with_ingresses<I: IntoIterator<Item = T>, T: Into<String>>(mut self, names: I) -> Self {
        self.ingresses = names.into_iter().map(Into::into).collect();
        self
    }

    /// Constrain on ingress adapter kinds
    #[must_use]
    pub fn with_ingress_kinds<I: IntoIterator<Item = AdapterKind>>(mut self, kinds: I) -> Self {
        self.ingress_kinds = kinds.into_iter().collect();
        self
    }

    /// Constrain on host patterns
    #[must_use]
    pub fn with_patterns<I: IntoIterator<Item = T>, T: Into<String>>(mut self, patterns: I) -> Self {
        self.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Constrain on domain suffixes
    #[must_use]
    pub fn with_domains<I: IntoIterator<Item = T>, T: Into<String>>(mut self, domains: I) -> Self {
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Constrain on countries
    #[must_use]
    pub fn with_countries<I: IntoIterator<Item = T>, T: Into<String>>(mut self, codes: I) -> Self {
        self.countries = codes.into_iter().map(Into::into).collect();
        self
    }
}

/// The ordered rule list plus the default egress
///
/// `default` is optional on input (`None` keeps the current default) and
/// always populated when read back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Route {
    /// Default egress when no rule matches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Rule names in evaluation order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<String>,
}

impl Route {
    /// Route with only a default egress
    #[must_use]
    pub fn to_default(egress: impl Into<String>) -> Self {
        Self {
            default: Some(egress.into()),
            rules: Vec::new(),
        }
    }

    /// Route with an explicit rule order, keeping the current default
    #[must_use]
    pub fn with_rules<I: IntoIterator<Item = T>, T: Into<String>>(mut self, rules: I) -> Self {
        self.rules = rules.into_iter().map(Into::into).collect();
        self
    }
}

/// A rule with its matchers built, ready for evaluation
#[derive(Debug, Clone)]
pub(crate) struct CompiledRule {
    /// The rule as supplied, for iteration and serialization
    pub source: Rule,
    /// Resolved egress name
    pub egress: String,
    pub ranges: Vec<IpNet>,
    pub ingresses: HashSet<String>,
    pub ingress_kinds: HashSet<AdapterKind>,
    pub patterns: Vec<Regex>,
    pub domains: Vec<String>,
    /// Uppercased country codes
    pub countries: HashSet<String>,
}

impl CompiledRule {
    /// Validate and compile a rule
    pub fn compile(source: Rule) -> Result<Self, RouteError> {
        let mut ranges = Vec::with_capacity(source.ranges.len());
        for range in &source.ranges {
            let net = range
                .parse::<IpNet>()
                .map_err(|_| RouteError::invalid_range(range))?;
            ranges.push(net);
        }

        for kind in &source.ingress_kinds {
            if kind.is_outbound_only() {
                return Err(RouteError::DisallowedKind(kind.to_string()));
            }
        }

        let mut patterns = Vec::with_capacity(source.patterns.len());
        for pattern in &source.patterns {
            let regex =
                Regex::new(pattern).map_err(|_| RouteError::InvalidPattern(pattern.clone()))?;
            patterns.push(regex);
        }

        for domain in &source.domains {
            if domain.is_empty() || domain.starts_with('.') {
                return Err(RouteError::InvalidDomain(domain.clone()));
            }
        }

        let mut countries = HashSet::with_capacity(source.countries.len());
        for code in &source.countries {
            if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(RouteError::InvalidCountry(code.clone()));
            }
            countries.insert(code.to_ascii_uppercase());
        }

        Ok(Self {
            egress: source.egress.clone().unwrap_or_else(|| "direct".to_string()),
            ranges,
            ingresses: source.ingresses.iter().cloned().collect(),
            ingress_kinds: source.ingress_kinds.iter().copied().collect(),
            patterns,
            domains: source.domains.clone(),
            countries,
            source,
        })
    }

    /// Whether matching this rule can require the destination IP
    pub fn needs_ip(&self) -> bool {
        !self.ranges.is_empty() || !self.countries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_kind_outbound_only() {
        assert!(AdapterKind::Direct.is_outbound_only());
        assert!(AdapterKind::Reject.is_outbound_only());
        assert!(!AdapterKind::Http.is_outbound_only());
        assert!(!AdapterKind::Socks5.is_outbound_only());
    }

    #[test]
    fn test_adapter_kind_serde() {
        assert_eq!(serde_json::to_string(&AdapterKind::Http).unwrap(), "\"http\"");
        let kind: AdapterKind = serde_json::from_str("\"reject\"").unwrap();
        assert_eq!(kind, AdapterKind::Reject);
    }

    #[test]
    fn test_rule_serde_defaults() {
        let rule: Rule = serde_json::from_str(r#"{"egress":"proxy","domains":["example.com"]}"#)
            .unwrap();
        assert_eq!(rule.egress.as_deref(), Some("proxy"));
        assert_eq!(rule.domains, vec!["example.com"]);
        assert!(rule.ranges.is_empty());
        assert!(rule.patterns.is_empty());
    }

    #[test]
    fn test_compile_valid() {
        let rule = Rule::to_egress("proxy")
            .with_ranges(["10.0.0.0/8", "fd00::/8"])
            .with_patterns([r"^.*\.example\.com$"])
            .with_domains(["example.com"])
            .with_countries(["au"]);
        let compiled = CompiledRule::compile(rule).unwrap();
        assert_eq!(compiled.egress, "proxy");
        assert_eq!(compiled.ranges.len(), 2);
        assert!(compiled.countries.contains("AU"));
        assert!(compiled.needs_ip());
    }

    #[test]
    fn test_compile_defaults_egress_to_direct() {
        let compiled = CompiledRule::compile(Rule::default()).unwrap();
        assert_eq!(compiled.egress, "direct");
        assert!(!compiled.needs_ip());
    }

    #[test]
    fn test_compile_rejects_bad_range() {
        let rule = Rule::to_egress("proxy").with_ranges(["Invalid Range"]);
        assert!(matches!(
            CompiledRule::compile(rule),
            Err(RouteError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_compile_rejects_outbound_only_kind() {
        for kind in [AdapterKind::Direct, AdapterKind::Reject] {
            let rule = Rule::to_egress("proxy").with_ingress_kinds([kind]);
            assert!(matches!(
                CompiledRule::compile(rule),
                Err(RouteError::DisallowedKind(_))
            ));
        }
    }

    #[test]
    fn test_compile_rejects_bad_pattern() {
        let rule = Rule::to_egress("proxy").with_patterns(["[unclosed"]);
        assert!(matches!(
            CompiledRule::compile(rule),
            Err(RouteError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_compile_rejects_dotted_domain() {
        let rule = Rule::to_egress("proxy").with_domains([".example.com"]);
        assert!(matches!(
            CompiledRule::compile(rule),
            Err(RouteError::InvalidDomain(_))
        ));
    }

    #[test]
    fn test_compile_rejects_bad_country() {
        for code in ["AUS", "A", "4U"] {
            let rule = Rule::to_egress("proxy").with_countries([code]);
            assert!(matches!(
                CompiledRule::compile(rule),
                Err(RouteError::InvalidCountry(_))
            ));
        }
    }
}
