//! Error types for hopgate
//!
//! Errors are grouped by subsystem and folded into the top-level [`Error`].
//! The HTTP adapter distinguishes protocol violations from transport
//! failures; the router surfaces configuration-time violations to its API
//! callers and never fails while routing a connection.

use std::io;

use thiserror::Error;

/// Top-level error type for hopgate
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP adapter errors
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// Router configuration errors
    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    /// Configuration errors (file loading, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// HTTP adapter errors
///
/// A parser needing more bytes is not an error; it is a parse status. Every
/// variant here is terminal for the connection that raised it.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Malformed or disallowed HTTP construct
    #[error("Bad protocol: {0}")]
    BadProtocol(String),

    /// The peer closed the stream in the middle of a message head
    #[error("Unexpected end of stream while reading header")]
    UnexpectedEof,

    /// Transport-level failure
    #[error("HTTP I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HttpError {
    /// Create a bad-protocol error
    pub fn bad_protocol(msg: impl Into<String>) -> Self {
        Self::BadProtocol(msg.into())
    }
}

/// Router errors
///
/// All of these are surfaced synchronously to the API caller; none of them
/// can occur while a connection is being routed.
#[derive(Debug, Error)]
pub enum RouteError {
    /// A domain argument started with a dot (caller invariant violation)
    #[error("Domain must not start with a dot: {0}")]
    LeadingDot(String),

    /// A route referenced a rule that does not exist
    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    /// Attempted to erase a rule referenced by the current route
    #[error("Rule is referenced by the current route: {0}")]
    RuleInUse(String),

    /// A rule range failed to parse as CIDR notation
    #[error("Invalid CIDR range: {0}")]
    InvalidRange(String),

    /// A rule host pattern failed to compile
    #[error("Invalid host pattern: {0}")]
    InvalidPattern(String),

    /// A rule domain suffix was empty or started with a dot
    #[error("Invalid domain suffix: {0}")]
    InvalidDomain(String),

    /// A rule country code was not two ASCII letters
    #[error("Invalid country code: {0}")]
    InvalidCountry(String),

    /// A rule constrained on an adapter kind that never accepts clients
    #[error("Adapter kind cannot appear in an ingress constraint: {0}")]
    DisallowedKind(String),

    /// A route default named an egress unknown to the adapter registry
    #[error("Unknown egress: {0}")]
    UnknownEgress(String),

    /// The country database could not be loaded
    #[error("GeoIP database error: {0}")]
    GeoDatabase(String),
}

impl RouteError {
    /// Create an invalid-range error
    pub fn invalid_range(range: impl Into<String>) -> Self {
        Self::InvalidRange(range.into())
    }

    /// Create a geo-database error
    pub fn geo(msg: impl Into<String>) -> Self {
        Self::GeoDatabase(msg.into())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, dangling references)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// I/O error while reading the file
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }
}

/// Type alias for Result with the crate error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HttpError::bad_protocol("missing Host header");
        assert!(err.to_string().contains("missing Host header"));

        let err = RouteError::RuleInUse("cn-traffic".into());
        assert!(err.to_string().contains("cn-traffic"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err: Error = HttpError::from(io_err).into();
        assert!(matches!(err, Error::Http(HttpError::Io(_))));

        let err: Error = RouteError::RuleNotFound("x".into()).into();
        assert!(matches!(err, Error::Route(_)));
    }
}
