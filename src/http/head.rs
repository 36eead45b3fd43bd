//! Owned HTTP/1.x message heads
//!
//! The adapters parse a head once, reshape it, and write it back out
//! byte-exactly. [`RequestHead`] and [`ResponseHead`] are the owned forms
//! that survive the parser; serialization preserves header order and
//! spelling, only the fields the proxy rewrites change.
//!
//! Target rewriting follows the RFC 2068 proxy guidance for the
//! non-standard clients seen in the wild: the `Host` field is mandatory and
//! taken as the destination, the destination embedded in an absolute-form
//! target is ignored, and relative targets are forwarded untouched.

use crate::endpoint::Endpoint;
use crate::error::HttpError;

/// Ordered header list preserving arrival order and spelling
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Create from parsed name/value pairs
    #[must_use]
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self(fields)
    }

    /// First value for `name`, case-insensitive
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace every occurrence of `name` with a single field
    pub fn set(&mut self, name: &str, value: &str) {
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.0.push((name.to_string(), value.to_string()));
    }

    /// Whether the comma-separated value of `name` contains `token`
    #[must_use]
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.0
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        for (name, value) in &self.0 {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
    }
}

/// Parsed request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method, verbatim
    pub method: String,
    /// Request target, verbatim until rewritten
    pub target: String,
    /// HTTP/1.x minor version
    pub version: u8,
    /// Header fields in arrival order
    pub headers: Headers,
}

impl RequestHead {
    /// Build a CONNECT request for tunneling to `remote` through a hop
    #[must_use]
    pub fn connect(remote: &Endpoint) -> Self {
        let authority = remote.authority();
        let mut headers = Headers::default();
        headers.set("Host", &authority);
        let mut head = Self {
            method: "CONNECT".into(),
            target: authority,
            version: 1,
            headers,
        };
        head.set_close();
        head
    }

    /// Whether this message declared a protocol upgrade
    #[must_use]
    pub fn is_upgrade(&self) -> bool {
        self.headers.contains_token("Connection", "upgrade")
    }

    /// Ask the peer to close after this exchange
    ///
    /// The proxy never closes actively; setting close on both hop headers
    /// makes the origin do it.
    pub fn set_close(&mut self) {
        self.headers.set("Connection", "close");
        self.headers.set("Proxy-Connection", "close");
    }

    /// Reduce an absolute-form target to its path, leaving relative targets
    /// untouched
    ///
    /// # Errors
    ///
    /// Fails with [`HttpError::BadProtocol`] on an empty target or an
    /// absolute form without a scheme separator.
    pub fn strip_authority(&mut self) -> Result<(), HttpError> {
        if self.target.is_empty() {
            return Err(HttpError::bad_protocol("empty request target"));
        }
        if self.target.starts_with('/') {
            return Ok(());
        }
        let after_scheme = self
            .target
            .find("://")
            .map(|i| &self.target[i + 3..])
            .ok_or_else(|| {
                HttpError::bad_protocol(format!("unsupported request target: {}", self.target))
            })?;
        self.target = match after_scheme.find('/') {
            Some(i) => after_scheme[i..].to_string(),
            None => "/".to_string(),
        };
        Ok(())
    }

    /// Rewrite a relative target into absolute form from the `Host` field
    ///
    /// # Errors
    ///
    /// Fails with [`HttpError::BadProtocol`] when the `Host` field is
    /// missing.
    pub fn absolutize(&mut self) -> Result<(), HttpError> {
        let host = self.host_field()?;
        self.target = format!("http://{host}{}", self.target);
        Ok(())
    }

    /// Destination from the mandatory `Host` field
    ///
    /// # Errors
    ///
    /// Fails with [`HttpError::BadProtocol`] when `Host` is absent or
    /// unparseable.
    pub fn host_endpoint(&self) -> Result<Endpoint, HttpError> {
        Endpoint::parse_authority(self.host_field()?)
    }

    fn host_field(&self) -> Result<&str, HttpError> {
        self.headers
            .get("Host")
            .ok_or_else(|| HttpError::bad_protocol("missing Host field in HTTP header"))
    }

    /// Serialize to wire bytes
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(self.method.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.target.as_bytes());
        out.extend_from_slice(b" HTTP/1.");
        out.push(b'0' + self.version);
        out.extend_from_slice(b"\r\n");
        self.headers.write_to(&mut out);
        out
    }
}

/// Parsed response head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Status code
    pub status: u16,
    /// Reason phrase, verbatim
    pub reason: String,
    /// HTTP/1.x minor version
    pub version: u8,
    /// Header fields in arrival order
    pub headers: Headers,
}

impl ResponseHead {
    /// The tunnel-established confirmation written after CONNECT
    #[must_use]
    pub fn connection_established() -> Self {
        let mut head = Self {
            status: 200,
            reason: "Connection Established".into(),
            version: 1,
            headers: Headers::default(),
        };
        head.set_close();
        head
    }

    /// The error response for a connection that failed before confirmation
    #[must_use]
    pub fn gateway_timeout() -> Self {
        Self {
            status: 504,
            reason: "Gateway Timeout".into(),
            version: 1,
            headers: Headers::default(),
        }
    }

    /// Whether the status is a success (2xx)
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether this message declared a protocol upgrade
    #[must_use]
    pub fn is_upgrade(&self) -> bool {
        self.headers.contains_token("Connection", "upgrade")
    }

    /// Ask the peer to close after this exchange
    pub fn set_close(&mut self) {
        self.headers.set("Connection", "close");
        self.headers.set("Proxy-Connection", "close");
    }

    /// Serialize to wire bytes
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(b"HTTP/1.");
        out.push(b'0' + self.version);
        out.push(b' ');
        out.extend_from_slice(self.status.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.reason.as_bytes());
        out.extend_from_slice(b"\r\n");
        self.headers.write_to(&mut out);
        out
    }
}
