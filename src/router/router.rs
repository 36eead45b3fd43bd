//! Per-connection egress selection
//!
//! The [`Router`] holds named rules, an ordered route, and a default
//! egress. Readers take an atomic snapshot, so `route()` never blocks a
//! configuration change and never observes a half-applied one; writers are
//! serialized against each other and swap the whole state on success,
//! leaving it untouched on failure.
//!
//! Predicate order inside one rule is fixed, cheapest first: ingress kind,
//! ingress name, host pattern, domain suffix, IP range, country. The first
//! rule whose every populated dimension matches wins. Resolution of a
//! domain endpoint happens only when a still-candidate rule reaches an
//! IP predicate, and at most once per call.

use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::domain::match_domain;
use super::geo::{canonical_ip, GeoReader};
use super::rule::{AdapterKind, CompiledRule, Route, Rule};
use crate::endpoint::{Endpoint, HostKind};
use crate::error::RouteError;
use crate::net::AdapterRegistry;

/// Name of the built-in pass-through egress, the initial route default
pub const DEFAULT_EGRESS: &str = "direct";

#[derive(Clone)]
struct RouterState {
    rules: HashMap<String, Arc<CompiledRule>>,
    order: Vec<String>,
    default: String,
}

impl RouterState {
    fn initial() -> Self {
        Self {
            rules: HashMap::new(),
            order: Vec::new(),
            default: DEFAULT_EGRESS.to_string(),
        }
    }
}

/// Rule table and route evaluator
pub struct Router {
    geo: Arc<dyn GeoReader>,
    registry: Arc<dyn AdapterRegistry>,
    state: ArcSwap<RouterState>,
    write_lock: Mutex<()>,
}

impl Router {
    /// Create a router with its collaborators
    ///
    /// `geo` answers country lookups; `registry` vouches for egress names
    /// used as the route default.
    pub fn new(geo: Arc<dyn GeoReader>, registry: Arc<dyn AdapterRegistry>) -> Self {
        Self {
            geo,
            registry,
            state: ArcSwap::from_pointee(RouterState::initial()),
            write_lock: Mutex::new(()),
        }
    }

    /// Insert or replace a named rule
    ///
    /// # Errors
    ///
    /// Fails when the rule does not validate (bad range, bad pattern,
    /// dotted domain, bad country code, outbound-only ingress kind). The
    /// router is unchanged on failure.
    pub fn update(&self, name: &str, rule: Rule) -> Result<(), RouteError> {
        let compiled = Arc::new(CompiledRule::compile(rule)?);
        let _guard = self.write_lock.lock();
        let mut next = (**self.state.load()).clone();
        next.rules.insert(name.to_string(), compiled);
        self.state.store(Arc::new(next));
        debug!(rule = %name, "rule updated");
        Ok(())
    }

    /// Remove a named rule; removing an absent rule is a no-op
    ///
    /// # Errors
    ///
    /// Fails with [`RouteError::RuleInUse`] while the current route lists
    /// the rule. The router is unchanged on failure.
    pub fn erase(&self, name: &str) -> Result<(), RouteError> {
        let _guard = self.write_lock.lock();
        let current = self.state.load();
        if current.order.iter().any(|n| n == name) {
            return Err(RouteError::RuleInUse(name.to_string()));
        }
        if !current.rules.contains_key(name) {
            return Ok(());
        }
        let mut next = (**current).clone();
        next.rules.remove(name);
        self.state.store(Arc::new(next));
        debug!(rule = %name, "rule erased");
        Ok(())
    }

    /// Enumerate `(name, rule)` pairs, in no particular order
    #[must_use]
    pub fn iterate(&self) -> Vec<(String, Rule)> {
        self.state
            .load()
            .rules
            .iter()
            .map(|(name, rule)| (name.clone(), rule.source.clone()))
            .collect()
    }

    /// Replace the ordered rule list and, when given, the default egress
    ///
    /// # Errors
    ///
    /// Fails when a listed rule does not exist or the default is unknown
    /// to the adapter registry. The previous route is retained on failure.
    pub fn set_route(&self, route: Route) -> Result<(), RouteError> {
        let _guard = self.write_lock.lock();
        let current = self.state.load();
        for name in &route.rules {
            if !current.rules.contains_key(name) {
                return Err(RouteError::RuleNotFound(name.clone()));
            }
        }
        let default = match route.default {
            Some(default) => {
                if !self.registry.is_egress(&default) {
                    return Err(RouteError::UnknownEgress(default));
                }
                default
            }
            None => current.default.clone(),
        };
        let mut next = (**current).clone();
        next.order = route.rules;
        next.default = default;
        self.state.store(Arc::new(next));
        debug!("route replaced");
        Ok(())
    }

    /// Read the current route; the default is always populated
    #[must_use]
    pub fn get_route(&self) -> Route {
        let state = self.state.load();
        Route {
            default: Some(state.default.clone()),
            rules: state.order.clone(),
        }
    }

    /// Whether any rule or the route default references `egress`
    #[must_use]
    pub fn is_used(&self, egress: &str) -> bool {
        let state = self.state.load();
        state.default == egress || state.rules.values().any(|rule| rule.egress == egress)
    }

    /// Decide the egress for one connection
    ///
    /// `resolve` is invoked at most once, and only when a rule that
    /// survived its cheaper predicates constrains on IP while the endpoint
    /// is a domain name. An empty resolution makes every IP predicate
    /// fail. This method never fails; the route default is the final
    /// fallback.
    pub async fn route<F, Fut>(
        &self,
        endpoint: &Endpoint,
        ingress: &str,
        ingress_kind: AdapterKind,
        resolve: F,
    ) -> String
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Vec<IpAddr>>,
    {
        let state = self.state.load_full();
        let mut resolve = Some(resolve);
        let mut resolved: Option<Vec<IpAddr>> = None;

        for name in &state.order {
            let Some(rule) = state.rules.get(name) else {
                continue;
            };

            if !rule.ingress_kinds.is_empty() && !rule.ingress_kinds.contains(&ingress_kind) {
                continue;
            }
            if !rule.ingresses.is_empty() && !rule.ingresses.contains(ingress) {
                continue;
            }
            if !rule.patterns.is_empty()
                && !rule.patterns.iter().any(|p| p.is_match(endpoint.host()))
            {
                continue;
            }
            if !rule.domains.is_empty() {
                // Domain predicates silently fail for IP endpoints.
                if endpoint.kind() != HostKind::Domain {
                    continue;
                }
                if !rule
                    .domains
                    .iter()
                    .any(|s| match_domain(endpoint.host(), s).unwrap_or(false))
                {
                    continue;
                }
            }
            if rule.needs_ip() {
                if resolved.is_none() {
                    let ips = match endpoint.kind() {
                        HostKind::Domain => match resolve.take() {
                            Some(f) => f().await,
                            None => Vec::new(),
                        },
                        HostKind::Ipv4 | HostKind::Ipv6 => {
                            endpoint.host().parse::<IpAddr>().into_iter().collect()
                        }
                    };
                    trace!(count = ips.len(), "destination addresses gathered");
                    resolved = Some(ips);
                }
                let ips = resolved.as_deref().unwrap_or_default();
                if !rule.ranges.is_empty()
                    && !ips.iter().any(|ip| {
                        let ip = canonical_ip(*ip);
                        rule.ranges.iter().any(|net| net.contains(&ip))
                    })
                {
                    continue;
                }
                if !rule.countries.is_empty()
                    && !ips.iter().any(|ip| {
                        self.geo
                            .country(canonical_ip(*ip))
                            .is_some_and(|c| rule.countries.contains(&c.to_ascii_uppercase()))
                    })
                {
                    continue;
                }
            }

            debug!(rule = %name, egress = %rule.egress, "rule matched");
            return rule.egress.clone();
        }

        trace!(default = %state.default, "no rule matched");
        state.default.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::StaticRegistry;
    use crate::router::geo::NoGeo;

    fn router() -> Router {
        Router::new(
            Arc::new(NoGeo),
            Arc::new(StaticRegistry::new(["proxy", "placeholder"])),
        )
    }

    async fn no_resolve() -> Vec<IpAddr> {
        Vec::new()
    }

    #[test]
    fn test_initial_route() {
        let router = router();
        let route = router.get_route();
        assert_eq!(route.default.as_deref(), Some(DEFAULT_EGRESS));
        assert!(route.rules.is_empty());
        assert!(router.iterate().is_empty());
    }

    #[test]
    fn test_update_and_erase() {
        let router = router();
        router.update("r", Rule::to_egress("proxy")).unwrap();
        assert_eq!(router.iterate().len(), 1);

        router.erase("r").unwrap();
        assert!(router.iterate().is_empty());
    }

    #[test]
    fn test_failed_update_leaves_state() {
        let router = router();
        let bad = Rule::to_egress("proxy").with_ranges(["Invalid Range"]);
        assert!(router.update("r", bad).is_err());
        assert!(router.iterate().is_empty());
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let router = router();
        router
            .update("first", Rule::to_egress("proxy").with_domains(["example.com"]))
            .unwrap();
        router
            .update("second", Rule::to_egress("placeholder").with_domains(["example.com"]))
            .unwrap();
        router
            .set_route(Route::default().with_rules(["first", "second"]))
            .unwrap();

        let ep = Endpoint::new("www.example.com", 443);
        let egress = router.route(&ep, "in", AdapterKind::Http, no_resolve).await;
        assert_eq!(egress, "proxy");
    }

    #[tokio::test]
    async fn test_unmatched_falls_to_default() {
        let router = router();
        let ep = Endpoint::new("example.com", 443);
        let egress = router.route(&ep, "in", AdapterKind::Http, no_resolve).await;
        assert_eq!(egress, DEFAULT_EGRESS);
    }
}
