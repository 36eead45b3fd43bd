//! Bidirectional byte shuttling between adapter halves
//!
//! Adapters expose `recv`/`send` rather than raw `AsyncRead`/`AsyncWrite`
//! because a recv may be served from a cache and a send may be absorbed
//! into a parser. The seam traits here let the per-connection task pump
//! bytes between any pair of halves, including plain streams for the
//! `direct` egress.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::HttpError;

/// Shuttle buffer size per direction
pub const BUFFER_SIZE: usize = 16 * 1024;

/// Source half of an adapter
#[async_trait]
pub trait RecvStream: Send {
    /// Receive bytes into `buf`; `Ok(0)` means the peer is done
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, HttpError>;
}

/// Sink half of an adapter
#[async_trait]
pub trait SendStream: Send {
    /// Deliver `buf` in order
    async fn send(&mut self, buf: &[u8]) -> Result<(), HttpError>;

    /// Propagate end-of-stream to the peer
    async fn finish(&mut self) -> Result<(), HttpError>;
}

/// Plain read half, for egresses that need no protocol handling
pub struct RawReader<R>(pub R);

#[async_trait]
impl<R: AsyncRead + Unpin + Send> RecvStream for RawReader<R> {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        Ok(self.0.read(buf).await?)
    }
}

/// Plain write half, for egresses that need no protocol handling
pub struct RawWriter<W>(pub W);

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> SendStream for RawWriter<W> {
    async fn send(&mut self, buf: &[u8]) -> Result<(), HttpError> {
        Ok(self.0.write_all(buf).await?)
    }

    async fn finish(&mut self) -> Result<(), HttpError> {
        Ok(self.0.shutdown().await?)
    }
}

/// Bytes moved by a finished relay, per direction
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayStats {
    /// Bytes moved from the client toward the destination
    pub client_to_server: u64,
    /// Bytes moved from the destination toward the client
    pub server_to_client: u64,
}

impl RelayStats {
    /// Total bytes moved in both directions
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.client_to_server + self.server_to_client
    }
}

async fn pump<R, W>(reader: &mut R, writer: &mut W) -> Result<u64, HttpError>
where
    R: RecvStream,
    W: SendStream,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.recv(&mut buf).await?;
        if n == 0 {
            writer.finish().await?;
            trace!(bytes = total, "relay direction drained");
            return Ok(total);
        }
        writer.send(&buf[..n]).await?;
        total += n as u64;
    }
}

/// Pump both directions until each side reaches end-of-stream
///
/// A failure on either direction tears the whole relay down; closing the
/// underlying streams is the cancellation mechanism for the other side.
///
/// # Errors
///
/// Returns the first transport or protocol error from either direction.
pub async fn shuttle<CR, CW, SR, SW>(
    mut client_reader: CR,
    mut client_writer: CW,
    mut server_reader: SR,
    mut server_writer: SW,
) -> Result<RelayStats, HttpError>
where
    CR: RecvStream,
    CW: SendStream,
    SR: RecvStream,
    SW: SendStream,
{
    let (client_to_server, server_to_client) = tokio::try_join!(
        pump(&mut client_reader, &mut server_writer),
        pump(&mut server_reader, &mut client_writer),
    )?;
    Ok(RelayStats {
        client_to_server,
        server_to_client,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shuttle_echo() {
        let (client, proxy_side) = tokio::io::duplex(1024);
        let (upstream, proxy_upstream) = tokio::io::duplex(1024);

        let (pr, pw) = tokio::io::split(proxy_side);
        let (ur, uw) = tokio::io::split(proxy_upstream);

        let relay = tokio::spawn(shuttle(
            RawReader(pr),
            RawWriter(pw),
            RawReader(ur),
            RawWriter(uw),
        ));

        let (mut cr, mut cw) = tokio::io::split(client);
        let (mut sr, mut sw) = tokio::io::split(upstream);

        cw.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        sr.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        sw.write_all(b"pong").await.unwrap();
        cr.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        cw.shutdown().await.unwrap();
        sw.shutdown().await.unwrap();

        let stats = relay.await.unwrap().unwrap();
        assert_eq!(stats.client_to_server, 4);
        assert_eq!(stats.server_to_client, 4);
        assert_eq!(stats.total(), 8);
    }
}
