// src/buffer.rs

//! Growable in-memory byte queue.
//!
//! `ByteBuffer` is the staging area between a chunked network body and the
//! caller's reads: transports push whole chunks in, readers consume an
//! arbitrary number of bytes from the front. Bytes come out in exactly the
//! order they went in, regardless of chunk boundaries.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

/// A single-producer single-consumer FIFO byte queue.
///
/// Appends and front-consumes are O(1) amortized; a `read` that spans chunk
/// boundaries copies only the bytes it returns.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a slice to the back of the queue.
    pub fn write(&mut self, data: &[u8]) {
        if !data.is_empty() {
            self.write_bytes(Bytes::copy_from_slice(data));
        }
    }

    /// Appends an owned chunk without copying.
    pub fn write_bytes(&mut self, data: Bytes) {
        if !data.is_empty() {
            self.len += data.len();
            self.chunks.push_back(data);
        }
    }

    /// Consumes up to `n` bytes from the front.
    ///
    /// Returns fewer than `n` bytes only when the buffer holds fewer; an
    /// empty result means the buffer is empty.
    pub fn read(&mut self, n: usize) -> Bytes {
        if n == 0 || self.len == 0 {
            return Bytes::new();
        }

        // Fast path: the request is satisfied by the front chunk alone.
        if let Some(front) = self.chunks.front_mut() {
            if front.len() > n {
                self.len -= n;
                return front.split_to(n);
            }
            if front.len() == n {
                self.len -= n;
                return self.chunks.pop_front().unwrap_or_default();
            }
        }

        let take = n.min(self.len);
        let mut out = BytesMut::with_capacity(take);
        while out.len() < take {
            let mut front = match self.chunks.pop_front() {
                Some(c) => c,
                None => break,
            };
            let want = take - out.len();
            if front.len() <= want {
                out.extend_from_slice(&front);
            } else {
                out.extend_from_slice(&front.split_to(want));
                self.chunks.push_front(front);
            }
        }
        self.len -= out.len();
        out.freeze()
    }

    /// Copies up to `n` bytes from the front without consuming them.
    pub fn peek(&self, n: usize) -> Bytes {
        let take = n.min(self.len);
        let mut out = BytesMut::with_capacity(take);
        for chunk in &self.chunks {
            if out.len() >= take {
                break;
            }
            let want = take - out.len();
            out.extend_from_slice(&chunk[..want.min(chunk.len())]);
        }
        out.freeze()
    }

    /// Offset of the first occurrence of `byte`, if present.
    pub fn find_byte(&self, byte: u8) -> Option<usize> {
        let mut base = 0;
        for chunk in &self.chunks {
            if let Some(pos) = chunk.iter().position(|&b| b == byte) {
                return Some(base + pos);
            }
            base += chunk.len();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_across_chunk_boundaries() {
        let mut buf = ByteBuffer::new();
        buf.write(b"hel");
        buf.write(b"lo ");
        buf.write(b"world");

        assert_eq!(buf.len(), 11);
        assert_eq!(&buf.read(7)[..], b"hello w");
        assert_eq!(&buf.read(100)[..], b"orld");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_read_within_single_chunk() {
        let mut buf = ByteBuffer::new();
        buf.write(b"0123456789");

        assert_eq!(&buf.read(4)[..], b"0123");
        assert_eq!(&buf.read(4)[..], b"4567");
        assert_eq!(&buf.read(4)[..], b"89");
        assert_eq!(buf.read(4).len(), 0);
    }

    #[test]
    fn test_read_zero() {
        let mut buf = ByteBuffer::new();
        buf.write(b"abc");
        assert!(buf.read(0).is_empty());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut buf = ByteBuffer::new();
        buf.write(b"ab");
        buf.write(b"cd");

        assert_eq!(&buf.peek(3)[..], b"abc");
        assert_eq!(buf.len(), 4);
        assert_eq!(&buf.read(4)[..], b"abcd");
    }

    #[test]
    fn test_find_byte_across_chunks() {
        let mut buf = ByteBuffer::new();
        buf.write(b"abc");
        buf.write(b"def\nxyz");

        assert_eq!(buf.find_byte(b'\n'), Some(6));
        assert_eq!(buf.find_byte(b'q'), None);
    }

    #[test]
    fn test_write_bytes_zero_copy() {
        let mut buf = ByteBuffer::new();
        buf.write_bytes(Bytes::from_static(b"chunk"));
        buf.write_bytes(Bytes::new());
        assert_eq!(buf.len(), 5);
        assert_eq!(&buf.read(5)[..], b"chunk");
    }

    #[test]
    fn test_clear() {
        let mut buf = ByteBuffer::new();
        buf.write(b"data");
        buf.clear();
        assert!(buf.is_empty());
        assert!(buf.read(1).is_empty());
    }
}
