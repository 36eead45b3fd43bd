//! End-to-end adapter tests over in-memory duplex pipes: CONNECT
//! tunneling, relay rewrites in both directions, the egress fallback, and
//! cache-ordering behavior around header completion.

use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use hopgate::endpoint::{Endpoint, HostKind};
use hopgate::error::HttpError;
use hopgate::http::{HttpEgress, HttpIngress};
use hopgate::net::Dial;

/// Dialer handing out pre-arranged streams, one per dial.
struct QueueDial {
    streams: Mutex<VecDeque<DuplexStream>>,
}

impl QueueDial {
    fn new(streams: impl IntoIterator<Item = DuplexStream>) -> Self {
        Self {
            streams: Mutex::new(streams.into_iter().collect()),
        }
    }

    fn remaining(&self) -> usize {
        self.streams.lock().unwrap().len()
    }
}

#[async_trait]
impl Dial for QueueDial {
    type Stream = DuplexStream;

    async fn dial(&self, _target: &Endpoint) -> io::Result<DuplexStream> {
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "dial queue exhausted"))
    }
}

/// Read until the buffered bytes contain `needle`.
async fn read_until(stream: &mut DuplexStream, needle: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(needle.len()).any(|w| w == needle) {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "eof before expected bytes");
        buf.extend_from_slice(&chunk[..n]);
    }
    buf
}

async fn read_head(stream: &mut DuplexStream) -> Vec<u8> {
    read_until(stream, b"\r\n\r\n").await
}

// ======================= Ingress: CONNECT =======================

#[tokio::test]
async fn connect_tunnel_end_to_end() {
    let (mut client, server) = tokio::io::duplex(4096);
    client
        .write_all(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\nPAYLOAD")
        .await
        .unwrap();

    let mut ingress = HttpIngress::new(server);
    let remote = ingress.read_remote().await.unwrap();
    assert_eq!(remote.kind(), HostKind::Domain);
    assert_eq!(remote.host(), "example.com");
    assert_eq!(remote.port(), 443);

    ingress.confirm().await.unwrap();
    let confirmation = String::from_utf8(read_head(&mut client).await).unwrap();
    assert!(confirmation.starts_with("HTTP/1.1 200 Connection Established\r\n"));
    assert!(confirmation.contains("Connection: close\r\n"));
    assert!(confirmation.contains("Proxy-Connection: close\r\n"));

    // Bytes buffered behind the head come out before any wire read.
    let mut buf = [0u8; 64];
    let n = ingress.recv(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"PAYLOAD");

    // Then the wire takes over.
    client.write_all(b"MORE").await.unwrap();
    let n = ingress.recv(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"MORE");

    // Tunnel sends are raw.
    ingress.send(b"RAWBYTES").await.unwrap();
    let mut reply = [0u8; 8];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"RAWBYTES");
}

#[tokio::test]
async fn connect_head_split_across_reads() {
    let (client, server) = tokio::io::duplex(4096);
    let mut ingress = HttpIngress::new(server);

    let writer = tokio::spawn(async move {
        let mut client = client;
        client
            .write_all(b"CONNECT example.com:443 HTTP/1.1\r\n")
            .await
            .unwrap();
        tokio::task::yield_now().await;
        client
            .write_all(b"Host: example.com:443\r\n\r\nEARLY")
            .await
            .unwrap();
        client
    });

    let remote = ingress.read_remote().await.unwrap();
    assert_eq!(remote.host(), "example.com");

    let mut buf = [0u8; 16];
    let n = ingress.recv(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"EARLY");

    drop(writer.await.unwrap());
}

#[tokio::test]
async fn connect_without_host_is_accepted() {
    let (mut client, server) = tokio::io::duplex(4096);
    client
        .write_all(b"CONNECT example.com:8443 HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let mut ingress = HttpIngress::new(server);
    let remote = ingress.read_remote().await.unwrap();
    assert_eq!(remote.host(), "example.com");
    assert_eq!(remote.port(), 8443);
}

// ======================= Ingress: relay =======================

#[tokio::test]
async fn relay_absolute_uri_rewritten_to_path() {
    let (mut client, server) = tokio::io::duplex(4096);
    client
        .write_all(b"GET http://example.com/a HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();

    let mut ingress = HttpIngress::new(server);
    let remote = ingress.read_remote().await.unwrap();
    assert_eq!(remote.kind(), HostKind::Domain);
    assert_eq!(remote.host(), "example.com");
    assert_eq!(remote.port(), 80);

    // Relay confirm writes nothing.
    ingress.confirm().await.unwrap();

    let mut buf = [0u8; 1024];
    let n = ingress.recv(&mut buf).await.unwrap();
    let head = std::str::from_utf8(&buf[..n]).unwrap();
    assert!(head.starts_with("GET /a HTTP/1.1\r\n"));
    assert!(head.contains("Host: example.com\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    assert!(head.contains("Proxy-Connection: close\r\n"));
}

#[tokio::test]
async fn relay_relative_path_preserved() {
    let (mut client, server) = tokio::io::duplex(4096);
    client
        .write_all(b"GET /path?q=1 HTTP/1.1\r\nHost: example.com:8080\r\n\r\n")
        .await
        .unwrap();

    let mut ingress = HttpIngress::new(server);
    let remote = ingress.read_remote().await.unwrap();
    assert_eq!(remote.port(), 8080);

    let mut buf = [0u8; 1024];
    let n = ingress.recv(&mut buf).await.unwrap();
    let head = std::str::from_utf8(&buf[..n]).unwrap();
    assert!(head.starts_with("GET /path?q=1 HTTP/1.1\r\n"));
}

#[tokio::test]
async fn relay_without_host_is_fatal() {
    let (mut client, server) = tokio::io::duplex(4096);
    client
        .write_all(b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n")
        .await
        .unwrap();

    let mut ingress = HttpIngress::new(server);
    assert!(matches!(
        ingress.read_remote().await,
        Err(HttpError::BadProtocol(_))
    ));
}

#[tokio::test]
async fn relay_head_overflow_precedes_body_residue() {
    let (mut client, server) = tokio::io::duplex(4096);
    client
        .write_all(b"POST /up HTTP/1.1\r\nHost: h\r\nContent-Length: 4\r\n\r\nBODY")
        .await
        .unwrap();
    client.shutdown().await.unwrap();

    let mut ingress = HttpIngress::new(server);
    ingress.read_remote().await.unwrap();

    // Tiny buffers force the serialized head to spill into the cache in
    // front of the body bytes already there.
    let mut collected = Vec::new();
    let mut buf = [0u8; 10];
    loop {
        let n = ingress.recv(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&buf[..n]);
    }

    let expected = "POST /up HTTP/1.1\r\n\
                    Host: h\r\n\
                    Content-Length: 4\r\n\
                    Connection: close\r\n\
                    Proxy-Connection: close\r\n\
                    \r\n\
                    BODY";
    assert_eq!(std::str::from_utf8(&collected).unwrap(), expected);
}

#[tokio::test]
async fn relay_response_head_rewritten_once() {
    let (mut client, server) = tokio::io::duplex(4096);
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();

    let mut ingress = HttpIngress::new(server);
    ingress.read_remote().await.unwrap();

    // Feed the origin's response in two chunks; nothing reaches the client
    // until the head completes.
    ingress.send(b"HTTP/1.1 200 OK\r\nContent-").await.unwrap();
    ingress.send(b"Length: 2\r\n\r\nhi").await.unwrap();

    let reply = String::from_utf8(read_until(&mut client, b"hi").await).unwrap();
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(reply.contains("Content-Length: 2\r\n"));
    assert!(reply.contains("Connection: close\r\n"));
    assert!(reply.contains("Proxy-Connection: close\r\n"));
    assert!(reply.ends_with("\r\n\r\nhi"));

    // After the head, bytes pass through untouched.
    ingress.send(b"TRAILING").await.unwrap();
    let mut buf = [0u8; 8];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"TRAILING");
}

#[tokio::test]
async fn relay_upgrade_response_not_rewritten_to_close() {
    let (mut client, server) = tokio::io::duplex(4096);
    client
        .write_all(b"GET /ws HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();

    let mut ingress = HttpIngress::new(server);
    ingress.read_remote().await.unwrap();

    ingress
        .send(b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n")
        .await
        .unwrap();

    let reply = String::from_utf8(read_head(&mut client).await).unwrap();
    assert!(reply.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(reply.contains("Connection: Upgrade\r\n"));
    assert!(!reply.contains("Connection: close"));
}

#[tokio::test]
async fn failed_head_aborts_with_gateway_timeout() {
    let (mut client, server) = tokio::io::duplex(4096);
    client.write_all(b"\x16\x03\x01 not http\r\n\r\n").await.unwrap();

    let mut ingress = HttpIngress::new(server);
    assert!(ingress.read_remote().await.is_err());

    ingress.abort().await;
    let reply = String::from_utf8(read_head(&mut client).await).unwrap();
    assert_eq!(reply, "HTTP/1.1 504 Gateway Timeout\r\n\r\n");
}

// ======================= Egress =======================

fn remote() -> Endpoint {
    Endpoint::new("example.com", 443)
}

fn hop() -> Endpoint {
    Endpoint::new("proxy.internal", 3128)
}

#[tokio::test]
async fn egress_connect_establishes_tunnel() {
    let (mut upstream, egress_side) = tokio::io::duplex(4096);

    let upstream_task = tokio::spawn(async move {
        let head = String::from_utf8(read_head(&mut upstream).await).unwrap();
        assert!(head.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
        assert!(head.contains("Host: example.com:443\r\n"));
        assert!(head.contains("Connection: close\r\n"));

        upstream.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();

        let mut buf = [0u8; 4];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        upstream.write_all(b"pong").await.unwrap();
    });

    let dialer = QueueDial::new([egress_side]);
    let mut egress = HttpEgress::connect(&dialer, &remote(), &hop()).await.unwrap();
    assert_eq!(dialer.remaining(), 0);

    egress.send(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    let n = egress.recv(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"pong");

    upstream_task.await.unwrap();
}

#[tokio::test]
async fn egress_falls_back_to_relay_once() {
    let (mut refused, first_side) = tokio::io::duplex(4096);
    let (mut upstream, second_side) = tokio::io::duplex(4096);

    let refused_task = tokio::spawn(async move {
        let head = String::from_utf8(read_head(&mut refused).await).unwrap();
        assert!(head.starts_with("CONNECT "));
        refused
            .write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n")
            .await
            .unwrap();
    });

    let upstream_task = tokio::spawn(async move {
        let head = String::from_utf8(read_head(&mut upstream).await).unwrap();
        // Relay fallback rewrites the target into absolute form.
        assert!(head.starts_with("GET http://example.com/ HTTP/1.1\r\n"));
        assert!(head.contains("Connection: close\r\n"));
        assert!(head.contains("Proxy-Connection: close\r\n"));

        upstream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();
    });

    let dialer = QueueDial::new([first_side, second_side]);
    let mut egress = HttpEgress::connect(&dialer, &remote(), &hop()).await.unwrap();
    assert_eq!(dialer.remaining(), 0, "fallback dials the backup exactly once");

    // The request head is absorbed across chunks, rewritten, then flushed.
    egress.send(b"GET / HTTP/1.1\r\nHost: exam").await.unwrap();
    egress.send(b"ple.com\r\n\r\n").await.unwrap();

    let mut reply = Vec::new();
    let mut buf = [0u8; 256];
    while !reply.ends_with(b"ok") {
        let n = egress.recv(&mut buf).await.unwrap();
        assert!(n > 0, "eof before full response");
        reply.extend_from_slice(&buf[..n]);
    }
    let reply = String::from_utf8(reply).unwrap();
    // The egress does not touch the response; rewriting it is the
    // ingress's job.
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"));

    refused_task.await.unwrap();
    upstream_task.await.unwrap();
}

#[tokio::test]
async fn egress_relay_requires_host() {
    let (mut refused, first_side) = tokio::io::duplex(4096);
    let (_upstream, second_side) = tokio::io::duplex(4096);

    tokio::spawn(async move {
        read_head(&mut refused).await;
        refused
            .write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n")
            .await
            .unwrap();
    });

    let dialer = QueueDial::new([first_side, second_side]);
    let mut egress = HttpEgress::connect(&dialer, &remote(), &hop()).await.unwrap();

    let result = egress.send(b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n").await;
    assert!(matches!(result, Err(HttpError::BadProtocol(_))));
}

#[tokio::test]
async fn egress_truncated_connect_reply_is_fatal() {
    let (mut upstream, egress_side) = tokio::io::duplex(4096);

    tokio::spawn(async move {
        read_head(&mut upstream).await;
        upstream.write_all(b"HTTP/1.1 2").await.unwrap();
        upstream.shutdown().await.unwrap();
    });

    let dialer = QueueDial::new([egress_side]);
    let result = HttpEgress::connect(&dialer, &remote(), &hop()).await;
    assert!(matches!(result, Err(HttpError::UnexpectedEof)));
}
