//! HTTP egress adapter
//!
//! [`HttpEgress::connect`] dials the next hop and attempts an HTTP CONNECT
//! for the ultimate destination. Any 2xx makes the egress a raw
//! bidirectional tunnel. Anything else triggers the relay fallback exactly
//! once: the refused stream is closed, a backup stream is dialed, and the
//! egress behaves as a classical proxy client, rewriting the first outgoing
//! request head into absolute form.

use async_trait::async_trait;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, trace};

use super::cache::Cache;
use super::head::RequestHead;
use super::parse::{self, Status};
use crate::endpoint::Endpoint;
use crate::error::HttpError;
use crate::net::Dial;
use crate::relay::{RecvStream, SendStream};

const READ_CHUNK: usize = 8 * 1024;

/// Destination-to-client direction state
enum RecvState {
    /// Deliver cached bytes before touching the wire
    Drain,
    /// Read the wire directly
    Wire,
}

/// Client-to-destination direction state
enum SendState {
    /// Relay fallback: absorb chunks until the request head completes,
    /// then rewrite it into absolute form
    Absorb,
    /// Pass bytes through
    Raw,
}

/// Egress adapter over a connected upstream stream
pub struct HttpEgress<S> {
    r: EgressReader<S>,
    w: EgressWriter<S>,
}

/// Read half of a split egress
pub struct EgressReader<S> {
    reader: ReadHalf<S>,
    cache: Cache,
    state: RecvState,
}

/// Write half of a split egress
pub struct EgressWriter<S> {
    writer: WriteHalf<S>,
    cache: Cache,
    state: SendState,
}

impl<S> HttpEgress<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// Dial `next` and establish forwarding for `remote`
    ///
    /// `next` is the hop this egress talks to; `remote` is the destination
    /// the client asked for.
    ///
    /// # Errors
    ///
    /// Fails on dial errors, malformed upstream responses, and truncated
    /// streams. An upstream refusing CONNECT is not an error; it selects
    /// the relay fallback.
    pub async fn connect<D>(
        dialer: &D,
        remote: &Endpoint,
        next: &Endpoint,
    ) -> Result<Self, HttpError>
    where
        D: Dial<Stream = S> + ?Sized,
    {
        let mut stream = dialer.dial(next).await?;
        if Self::tunnel_handshake(remote, &mut stream).await? {
            debug!(%remote, hop = %next, "egress tunnel established");
            let (reader, writer) = split(stream);
            return Ok(Self {
                r: EgressReader {
                    reader,
                    cache: Cache::new(),
                    state: RecvState::Wire,
                },
                w: EgressWriter {
                    writer,
                    cache: Cache::new(),
                    state: SendState::Raw,
                },
            });
        }

        // The hop refused to tunnel. Retry once as a classical proxy
        // client on a fresh stream.
        debug!(%remote, hop = %next, "CONNECT refused, retrying as relay");
        drop(stream);
        let stream = dialer.dial(next).await?;
        let (reader, writer) = split(stream);
        Ok(Self {
            r: EgressReader {
                reader,
                cache: Cache::new(),
                state: RecvState::Drain,
            },
            w: EgressWriter {
                writer,
                cache: Cache::new(),
                state: SendState::Absorb,
            },
        })
    }

    async fn tunnel_handshake(remote: &Endpoint, stream: &mut S) -> Result<bool, HttpError> {
        let request = RequestHead::connect(remote);
        stream.write_all(&request.serialize()).await?;

        let mut cache = Cache::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match parse::response(cache.as_slice())? {
                Status::Complete { head, .. } => {
                    trace!(status = head.status, "CONNECT reply");
                    return Ok(head.is_success());
                }
                Status::Partial => {
                    let n = stream.read(&mut chunk).await?;
                    if n == 0 {
                        return Err(HttpError::UnexpectedEof);
                    }
                    cache.extend(&chunk[..n]);
                }
            }
        }
    }

    /// Receive bytes flowing back from the destination
    ///
    /// # Errors
    ///
    /// Fails on transport errors.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        self.r.recv(buf).await
    }

    /// Send bytes flowing toward the destination
    ///
    /// # Errors
    ///
    /// Fails on malformed request heads, a missing `Host` field in relay
    /// fallback, or transport errors.
    pub async fn send(&mut self, buf: &[u8]) -> Result<(), HttpError> {
        self.w.send(buf).await
    }

    /// Shut the upstream write side down, best-effort
    pub async fn close(&mut self) {
        let _ = self.w.writer.shutdown().await;
    }

    /// Split into independently owned halves for bidirectional relaying
    #[must_use]
    pub fn into_split(self) -> (EgressReader<S>, EgressWriter<S>) {
        (self.r, self.w)
    }
}

impl<S> EgressReader<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Receive bytes flowing back from the destination
    ///
    /// # Errors
    ///
    /// Fails on transport errors.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        if buf.is_empty() {
            return Ok(0);
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

impl<S> EgressWriter<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Send bytes flowing toward the destination
    ///
    /// # Errors
    ///
    /// Fails on malformed request heads, a missing `Host` field in relay
    /// fallback, or transport errors.
    pub async fn send(&mut self, buf: &[u8]) -> Result<(), HttpError> {
        match self.state {
            SendState::Absorb => {
                self.cache.extend(buf);
                match parse::request(self.cache.as_slice())? {
                    Status::Partial => Ok(()),
                    Status::Complete { mut head, len } => {
                        if !head.is_upgrade() {
                            head.set_close();
                        }
                        head.absolutize()?;
                        let mut wire = head.serialize();
                        wire.extend_from_slice(&self.cache.as_slice()[len..]);
                        self.cache.clear();
                        self.writer.write_all(&wire).await?;
                        self.state = SendState::Raw;
                        trace!("request head rewritten to absolute form");
                        Ok(())
                    }
                }
            }
            SendState::Raw => Ok(self.writer.write_all(buf).await?),
        }
    }
}

#[async_trait]
impl<S> RecvStream for EgressReader<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        EgressReader::recv(self, buf).await
    }
}

#[async_trait]
impl<S> SendStream for EgressWriter<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    async fn send(&mut self, buf: &[u8]) -> Result<(), HttpError> {
        EgressWriter::send(self, buf).await
    }

    async fn finish(&mut self) -> Result<(), HttpError> {
        Ok(self.writer.shutdown().await?)
    }
}
