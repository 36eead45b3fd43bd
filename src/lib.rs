//! hopgate: forwarding proxy core
//!
//! An HTTP proxy adapter pair and a policy router. The ingress accepts
//! client traffic in both CONNECT-tunnel and plain-relay form; the egress
//! forwards through an upstream HTTP proxy, falling back from tunneling to
//! classical relaying when the upstream refuses CONNECT. Between them, the
//! router picks a named egress per connection from ordered predicate
//! rules, resolving the destination only when a rule actually needs an IP.
//!
//! # Architecture
//!
//! ```text
//! Client → HttpIngress → Router → (direct | reject | HttpEgress) → Next hop
//!              ↓                                  ↓
//!        head parse/rewrite                CONNECT, relay fallback
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`endpoint`]: Destination endpoints
//! - [`error`]: Error types
//! - [`http`]: HTTP ingress/egress adapters
//! - [`net`]: Dialing and the adapter-name registry
//! - [`relay`]: Bidirectional byte shuttling
//! - [`router`]: Policy routing

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod net;
pub mod relay;
pub mod router;

pub use config::{load_config, load_config_str, Config, EgressConfig, IngressConfig};
pub use endpoint::{Endpoint, HostKind};
pub use error::{ConfigError, Error, HttpError, Result, RouteError};
pub use http::{HttpEgress, HttpIngress};
pub use net::{AdapterRegistry, Dial, StaticRegistry, TcpDial};
pub use relay::{shuttle, RawReader, RawWriter, RecvStream, RelayStats, SendStream};
pub use router::{
    match_domain, AdapterKind, CountryDb, GeoReader, NoGeo, Route, Router, Rule, DEFAULT_EGRESS,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
