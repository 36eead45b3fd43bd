//! Byte cache for the HTTP adapters
//!
//! Each adapter direction owns one [`Cache`]. It plays three roles over a
//! connection's life: accumulating wire bytes for the incremental head
//! parser, holding a serialized head that did not fit the caller's buffer,
//! and holding post-head residue that was consumed from the wire but not
//! yet drained by the caller.
//!
//! The one delicate operation is [`Cache::push_front`]: a re-serialized
//! head must be transmitted before residue that is already buffered, so new
//! bytes go in ahead of old ones. This is done by appending and rotating
//! rather than shifting the residue out of the way.

use bytes::{Buf, BytesMut};

/// Growable byte buffer with front-drain and prefix-insert
#[derive(Debug, Default)]
pub struct Cache {
    buf: BytesMut,
}

impl Cache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the cache holds no bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// View the buffered bytes
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Append bytes at the back
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Discard `n` bytes from the front
    pub fn consume(&mut self, n: usize) {
        self.buf.advance(n);
    }

    /// Insert bytes at the front, ahead of everything already buffered
    ///
    /// ```
    /// use hopgate::http::cache::Cache;
    ///
    /// let mut cache = Cache::new();
    /// cache.extend(b"residue");
    /// cache.push_front(b"header");
    /// assert_eq!(cache.as_slice(), b"headerresidue");
    /// ```
    pub fn push_front(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        self.buf.rotate_right(data.len());
    }

    /// Copy as many bytes as fit into `out`, consuming them
    ///
    /// Returns the number of bytes copied.
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let n = self.buf.len().min(out.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        self.buf.advance(n);
        n
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
