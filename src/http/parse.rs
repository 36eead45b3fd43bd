//! Incremental HTTP/1.x head parsing
//!
//! `httparse` is stateless, so incremental parsing re-runs it over the
//! accumulated buffer after every read. The functions here return
//! [`Status::Partial`] while the head is incomplete (never an error) and
//! [`Status::Complete`] with the owned head plus the number of bytes it
//! occupied, so the caller can leave body residue in its cache.

use httparse::{Request, Response, EMPTY_HEADER};

use super::head::{Headers, RequestHead, ResponseHead};
use crate::error::HttpError;

/// Maximum number of header fields accepted per message
pub const MAX_HEADERS: usize = 64;

/// Outcome of feeding accumulated bytes to the parser
#[derive(Debug)]
pub enum Status<T> {
    /// The head is not complete yet; read more and try again
    Partial,
    /// The head is complete; `len` bytes of the input belong to it
    Complete {
        /// Parsed, owned head
        head: T,
        /// Bytes consumed by the head, including the blank line
        len: usize,
    },
}

/// Try to parse a complete request head from `buf`
///
/// # Errors
///
/// Returns [`HttpError::BadProtocol`] on malformed input. A truncated head
/// is reported as [`Status::Partial`], never as an error.
pub fn request(buf: &[u8]) -> Result<Status<RequestHead>, HttpError> {
    let mut fields = [EMPTY_HEADER; MAX_HEADERS];
    let mut req = Request::new(&mut fields);
    match req.parse(buf) {
        Ok(httparse::Status::Partial) => Ok(Status::Partial),
        Ok(httparse::Status::Complete(len)) => {
            let head = RequestHead {
                method: required(req.method, "method")?.to_string(),
                target: required(req.path, "target")?.to_string(),
                version: required(req.version, "version")?,
                headers: owned_headers(req.headers)?,
            };
            Ok(Status::Complete { head, len })
        }
        Err(e) => Err(HttpError::bad_protocol(format!("request head: {e}"))),
    }
}

/// Try to parse a complete response head from `buf`
///
/// # Errors
///
/// Returns [`HttpError::BadProtocol`] on malformed input.
pub fn response(buf: &[u8]) -> Result<Status<ResponseHead>, HttpError> {
    let mut fields = [EMPTY_HEADER; MAX_HEADERS];
    let mut resp = Response::new(&mut fields);
    match resp.parse(buf) {
        Ok(httparse::Status::Partial) => Ok(Status::Partial),
        Ok(httparse::Status::Complete(len)) => {
            let head = ResponseHead {
                status: required(resp.code, "status")?,
                reason: resp.reason.unwrap_or_default().to_string(),
                version: required(resp.version, "version")?,
                headers: owned_headers(resp.headers)?,
            };
            Ok(Status::Complete { head, len })
        }
        Err(e) => Err(HttpError::bad_protocol(format!("response head: {e}"))),
    }
}

fn required<T>(part: Option<T>, what: &str) -> Result<T, HttpError> {
    part.ok_or_else(|| HttpError::bad_protocol(format!("incomplete head: missing {what}")))
}

fn owned_headers(fields: &[httparse::Header<'_>]) -> Result<Headers, HttpError> {
    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        let value = std::str::from_utf8(field.value)
            .map_err(|_| HttpError::bad_protocol(format!("non-UTF-8 value for {}", field.name)))?;
        out.push((field.name.to_string(), value.to_string()));
    }
    Ok(Headers::new(out))
}
