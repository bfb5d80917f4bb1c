// Copyright (c) 2019 Parity Technologies (UK) Ltd.
// Copyright (c) 2016 twist developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! A growable byte buffer that owns a connection's unparsed inbound bytes
//! between `read()` calls and the HTTP/frame parsers.

use bytes::BytesMut;

/// Byte buffer with find/peek/consume operations over inbound socket data.
///
/// Not thread-safe; each connection owns exactly one `RecvBuffer`.
#[derive(Debug, Default)]
pub struct RecvBuffer {
    inner: BytesMut,
}

impl RecvBuffer {
    pub fn new() -> Self {
        RecvBuffer { inner: BytesMut::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        RecvBuffer { inner: BytesMut::with_capacity(cap) }
    }

    /// Append freshly read bytes.
    pub fn append(&mut self, bytes: &[u8]) {
        self.inner.extend_from_slice(bytes);
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Up to `n` bytes without consuming them.
    pub fn peek(&self, n: usize) -> &[u8] {
        let n = n.min(self.inner.len());
        &self.inner[..n]
    }

    /// Index of the first occurrence of `needle`, standard substring
    /// semantics: the index of the match's first byte, nothing added.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() || needle.len() > self.inner.len() {
            return None
        }
        self.inner.windows(needle.len()).position(|w| w == needle)
    }

    /// Remove and return the first `n` bytes, advancing the buffer.
    pub fn consume(&mut self, n: usize) -> BytesMut {
        let n = n.min(self.inner.len());
        self.inner.split_to(n)
    }

    /// Direct access to the underlying buffer, for callers (the frame codec)
    /// that need to decode straight out of it without an intermediate copy.
    pub fn as_bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.inner
    }
}

#[cfg(test)]
mod test {
    use super::RecvBuffer;

    #[test]
    fn find_returns_start_of_match_not_past_it() {
        let mut b = RecvBuffer::new();
        b.append(b"GET / HTTP/1.1\r\nHost: x\r\n\r\nrest");
        let pos = b.find(b"\r\n\r\n").unwrap();
        assert_eq!(&b.peek(pos + 4)[pos..], b"\r\n\r\n");
        assert_eq!(pos, "GET / HTTP/1.1\r\nHost: x".len());
    }

    #[test]
    fn find_missing_needle_is_none() {
        let mut b = RecvBuffer::new();
        b.append(b"no terminator here");
        assert_eq!(b.find(b"\r\n\r\n"), None);
    }

    #[test]
    fn consume_advances_and_returns_prefix() {
        let mut b = RecvBuffer::new();
        b.append(b"hello world");
        let head = b.consume(5);
        assert_eq!(&head[..], b"hello");
        assert_eq!(b.peek(6), b" world");
        assert_eq!(b.len(), 6);
    }

    #[test]
    fn consume_more_than_available_takes_all() {
        let mut b = RecvBuffer::new();
        b.append(b"hi");
        let all = b.consume(100);
        assert_eq!(&all[..], b"hi");
        assert!(b.is_empty());
    }
}
