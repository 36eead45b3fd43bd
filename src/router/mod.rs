//! Policy routing
//!
//! Rules are named conjunctions of predicates over a connection's ingress
//! and destination; the route is an ordered list of rule names plus a
//! default egress. Evaluation is short-circuit and resolves the
//! destination only when a rule actually needs an IP.

pub mod domain;
pub mod geo;
pub mod rule;
#[allow(clippy::module_inception)]
pub mod router;

pub use domain::match_domain;
pub use geo::{CountryDb, GeoReader, NoGeo};
pub use rule::{AdapterKind, Route, Rule};
pub use router::{Router, DEFAULT_EGRESS};
