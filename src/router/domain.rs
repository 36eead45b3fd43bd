//! Domain suffix matching
//!
//! A suffix matches a host when they are equal or when the host ends with
//! a dot followed by the suffix. Boundary handling is what keeps
//! `fooexample.com` from matching `example.com` and `example.com` from
//! matching the bare label `example`.

use crate::error::RouteError;

/// Whether `host` equals `suffix` or lies under it
///
/// Neither argument may start with a dot; suffixes are stored without
/// one, and passing such a value is a caller bug, not a non-match.
/// Empty arguments never match.
///
/// # Errors
///
/// Returns [`RouteError::LeadingDot`] when either argument starts with a
/// dot.
///
/// # Example
///
/// ```
/// use hopgate::router::match_domain;
///
/// assert!(match_domain("foo.example.com", "example.com").unwrap());
/// assert!(!match_domain("fooexample.com", "example.com").unwrap());
/// assert!(match_domain(".example.com", "example.com").is_err());
/// ```
pub fn match_domain(host: &str, suffix: &str) -> Result<bool, RouteError> {
    if host.starts_with('.') {
        return Err(RouteError::LeadingDot(host.to_string()));
    }
    if suffix.starts_with('.') {
        return Err(RouteError::LeadingDot(suffix.to_string()));
    }
    if host.is_empty() || suffix.is_empty() {
        return Ok(false);
    }
    if host.len() == suffix.len() {
        return Ok(host.eq_ignore_ascii_case(suffix));
    }
    if host.len() > suffix.len() {
        let boundary = host.len() - suffix.len() - 1;
        return Ok(host.as_bytes()[boundary] == b'.'
            && host[boundary + 1..].eq_ignore_ascii_case(suffix));
    }
    Ok(false)
}
