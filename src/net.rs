//! Dialing and the adapter-name registry
//!
//! [`Dial`] is the seam the egress adapter uses to obtain streams; the
//! production implementation is plain TCP, tests substitute in-memory
//! pipes. [`AdapterRegistry`] is the router's collaborator for checking
//! that a name plausibly denotes an egress; it owns no adapter state.

use std::collections::HashSet;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::trace;

use crate::endpoint::Endpoint;

/// Factory for upstream byte streams
#[async_trait]
pub trait Dial: Send + Sync {
    /// Stream type produced by this dialer
    type Stream: AsyncRead + AsyncWrite + Send + Unpin;

    /// Open a fresh stream to `target`
    async fn dial(&self, target: &Endpoint) -> io::Result<Self::Stream>;
}

/// Plain TCP dialer
///
/// Resolves domain targets through the runtime's resolver and applies the
/// usual proxy socket options (no Nagle, keepalive probes for long-lived
/// tunnels).
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDial;

#[async_trait]
impl Dial for TcpDial {
    type Stream = TcpStream;

    async fn dial(&self, target: &Endpoint) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((target.host(), target.port())).await?;
        stream.set_nodelay(true)?;

        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(60))
            .with_interval(Duration::from_secs(15));
        SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;

        trace!(%target, "dialed");
        Ok(stream)
    }
}

/// Name validator for egress references
///
/// The router does not own adapters; it only needs to refuse route
/// defaults that could never resolve to one.
pub trait AdapterRegistry: Send + Sync {
    /// Whether `name` denotes a known egress
    fn is_egress(&self, name: &str) -> bool;
}

/// Fixed set of egress names, plus the built-in `direct` and `reject`
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    names: HashSet<String>,
}

impl StaticRegistry {
    /// Build from configured egress names
    pub fn new<I, T>(names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl AdapterRegistry for StaticRegistry {
    fn is_egress(&self, name: &str) -> bool {
        name == "direct" || name == "reject" || self.names.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_registry_builtins() {
        let registry = StaticRegistry::default();
        assert!(registry.is_egress("direct"));
        assert!(registry.is_egress("reject"));
        assert!(!registry.is_egress("upstream"));
    }

    #[test]
    fn test_static_registry_configured() {
        let registry = StaticRegistry::new(["upstream", "cn-exit"]);
        assert!(registry.is_egress("upstream"));
        assert!(registry.is_egress("cn-exit"));
        assert!(!registry.is_egress("unknown"));
    }
}
