//! HTTP ingress adapter
//!
//! One [`HttpIngress`] wraps one accepted client stream. `read_remote`
//! parses the initial request head and classifies the connection:
//!
//! * **CONNECT**: the target supplies the destination; after `confirm`
//!   writes the established response, both directions are raw bytes. Any
//!   bytes the client sent behind its request head are already buffered
//!   and are delivered before the wire is read again.
//! * **relay**: the mandatory `Host` field supplies the destination; the
//!   first `recv` re-serializes the (rewritten) request head, and `send`
//!   absorbs the origin's response head, rewrites it once, then passes
//!   bytes through.
//!
//! Sub-states are tagged enums advanced in place; each transition mirrors
//! one rebinding of the send/recv behavior.

use std::mem;

use async_trait::async_trait;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, trace};

use super::cache::Cache;
use super::head::{RequestHead, ResponseHead};
use super::parse::{self, Status};
use crate::endpoint::Endpoint;
use crate::error::HttpError;
use crate::relay::{RecvStream, SendStream};

const READ_CHUNK: usize = 8 * 1024;

/// Client-to-destination direction state
enum RecvState {
    /// Relay mode, request head parsed but not yet re-serialized
    Head(Box<RequestHead>),
    /// Deliver cached bytes before touching the wire
    Drain,
    /// Cache exhausted, read the wire directly
    Wire,
}

/// Destination-to-client direction state
enum SendState {
    /// Absorb outbound chunks until the response head completes
    Absorb,
    /// Head rewritten and flushed, pass bytes through
    Raw,
}

/// What `confirm` still owes the client
enum ConfirmAction {
    /// CONNECT accepted, the established response is pending
    Tunnel,
    /// Relay mode, nothing to write
    Noop,
    /// Confirmation already delivered
    Done,
}

/// Ingress adapter over an accepted stream
///
/// TLS acceptance, when configured, happens before the stream reaches this
/// type; the adapter only assumes ordered bytes.
pub struct HttpIngress<S> {
    r: IngressReader<S>,
    w: IngressWriter<S>,
}

/// Read half of a split ingress
pub struct IngressReader<S> {
    reader: ReadHalf<S>,
    cache: Cache,
    state: RecvState,
}

/// Write half of a split ingress
pub struct IngressWriter<S> {
    writer: WriteHalf<S>,
    cache: Cache,
    state: SendState,
    confirm: ConfirmAction,
}

impl<S> HttpIngress<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// Wrap an accepted stream
    pub fn new(stream: S) -> Self {
        let (reader, writer) = split(stream);
        Self {
            r: IngressReader {
                reader,
                cache: Cache::new(),
                state: RecvState::Drain,
            },
            w: IngressWriter {
                writer,
                cache: Cache::new(),
                state: SendState::Raw,
                confirm: ConfirmAction::Noop,
            },
        }
    }

    /// Read the initial request head and derive the destination
    ///
    /// Classifies the connection as tunnel or relay and arms the state
    /// machine accordingly. Bytes read past the head stay cached for the
    /// first `recv`.
    ///
    /// # Errors
    ///
    /// Fails on malformed heads, a relay request without `Host`, truncated
    /// streams, and transport errors.
    pub async fn read_remote(&mut self) -> Result<Endpoint, HttpError> {
        let head = self.r.read_head().await?;

        if head.method == "CONNECT" {
            // CONNECT carries the destination in its target. Host is not
            // required here; some clients omit it.
            let endpoint = Endpoint::parse_authority(&head.target)?;
            debug!(remote = %endpoint, "ingress CONNECT");
            self.r.state = RecvState::Drain;
            self.w.state = SendState::Raw;
            self.w.confirm = ConfirmAction::Tunnel;
            Ok(endpoint)
        } else {
            let mut head = head;
            head.strip_authority()?;
            let endpoint = head.host_endpoint()?;
            debug!(remote = %endpoint, method = %head.method, "ingress relay");
            self.r.state = RecvState::Head(Box::new(head));
            self.w.state = SendState::Absorb;
            self.w.confirm = ConfirmAction::Noop;
            Ok(endpoint)
        }
    }

    /// Acknowledge the client once the egress is connected
    ///
    /// # Errors
    ///
    /// Fails on transport errors while writing the tunnel confirmation.
    pub async fn confirm(&mut self) -> Result<(), HttpError> {
        self.w.confirm().await
    }

    /// Receive bytes flowing toward the destination
    ///
    /// # Errors
    ///
    /// Fails on transport errors.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        self.r.recv(buf).await
    }

    /// Send bytes flowing back to the client
    ///
    /// # Errors
    ///
    /// Fails on malformed response heads or transport errors.
    pub async fn send(&mut self, buf: &[u8]) -> Result<(), HttpError> {
        self.w.send(buf).await
    }

    /// Best-effort error reply for a connection that failed before
    /// confirmation; write errors are suppressed
    pub async fn abort(&mut self) {
        self.w.abort().await;
    }

    /// Shut the client-facing write side down, best-effort
    pub async fn close(&mut self) {
        let _ = self.w.writer.shutdown().await;
    }

    /// Split into independently owned halves for bidirectional relaying
    #[must_use]
    pub fn into_split(self) -> (IngressReader<S>, IngressWriter<S>) {
        (self.r, self.w)
    }
}

impl<S> IngressReader<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    async fn read_head(&mut self) -> Result<RequestHead, HttpError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match parse::request(self.cache.as_slice())? {
                Status::Complete { head, len } => {
                    self.cache.consume(len);
                    return Ok(head);
                }
                Status::Partial => {
                    let n = self.reader.read(&mut chunk).await?;
                    if n == 0 {
                        return Err(HttpError::UnexpectedEof);
                    }
                    self.cache.extend(&chunk[..n]);
                }
            }
        }
    }

    /// Receive bytes flowing toward the destination
    ///
    /// # Errors
    ///
    /// Fails on transport errors.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        if buf.is_empty() {
            return Ok(0);
        }

        // Relay mode delivers the rewritten head exactly once, then drops
        // to plain draining. Overflow goes in front of any body residue so
        // the head stays first on the wire.
        match mem::replace(&mut self.state, RecvState::Drain) {
            RecvState::Head(mut head) => {
                if !head.is_upgrade() {
                    head.set_close();
                }
                let wire = head.serialize();
                let n = wire.len().min(buf.len());
                buf[..n].copy_from_slice(&wire[..n]);
                if n < wire.len() {
                    self.cache.push_front(&wire[n..]);
                }
                trace!(bytes = n, "request head re-serialized");
                return Ok(n);
            }
            other => self.state = other,
        }

        if matches!(self.state, RecvState::Drain) {
            if self.cache.is_empty() {
                self.state = RecvState::Wire;
            } else {
                return Ok(self.cache.drain_into(buf));
            }
        }

        Ok(self.reader.read(buf).await?)
    }
}

impl<S> IngressWriter<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    async fn confirm(&mut self) -> Result<(), HttpError> {
        match mem::replace(&mut self.confirm, ConfirmAction::Done) {
            ConfirmAction::Tunnel => {
                let wire = ResponseHead::connection_established().serialize();
                self.writer.write_all(&wire).await?;
                trace!("tunnel confirmed");
                Ok(())
            }
            ConfirmAction::Noop | ConfirmAction::Done => Ok(()),
        }
    }

    /// Send bytes flowing back to the client
    ///
    /// # Errors
    ///
    /// Fails on malformed response heads or transport errors.
    pub async fn send(&mut self, buf: &[u8]) -> Result<(), HttpError> {
        match self.state {
            SendState::Absorb => {
                self.cache.extend(buf);
                match parse::response(self.cache.as_slice())? {
                    Status::Partial => Ok(()),
                    Status::Complete { mut head, len } => {
                        if !head.is_upgrade() {
                            head.set_close();
                        }
                        // The rewritten head and any body bytes of this
                        // chunk go out in one write, keeping the head ahead
                        // of the body.
                        let mut wire = head.serialize();
                        wire.extend_from_slice(&self.cache.as_slice()[len..]);
                        self.cache.clear();
                        self.writer.write_all(&wire).await?;
                        self.state = SendState::Raw;
                        trace!("response head rewritten");
                        Ok(())
                    }
                }
            }
            SendState::Raw => Ok(self.writer.write_all(buf).await?),
        }
    }

    async fn abort(&mut self) {
        if matches!(self.confirm, ConfirmAction::Done) {
            return;
        }
        self.confirm = ConfirmAction::Done;
        let wire = ResponseHead::gateway_timeout().serialize();
        let _ = self.writer.write_all(&wire).await;
    }
}

#[async_trait]
impl<S> RecvStream for IngressReader<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        IngressReader::recv(self, buf).await
    }
}

#[async_trait]
impl<S> SendStream for IngressWriter<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    async fn send(&mut self, buf: &[u8]) -> Result<(), HttpError> {
        IngressWriter::send(self, buf).await
    }

    async fn finish(&mut self) -> Result<(), HttpError> {
        Ok(self.writer.shutdown().await?)
    }
}
