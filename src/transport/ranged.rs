// src/transport/ranged.rs

//! Seekable reader over range-addressable remote objects.
//!
//! S3 and GCS present the same read shape: learn the object size up front,
//! stream one live ranged GET at a time, and re-open lazily after a seek.
//! [`RangedReader`] implements that shape once over the [`RangedFetch`]
//! capability; each service supplies its own fetch implementation.
//!
//! `position` tracks the far end of the bytes pulled from the service, so
//! the logical offset seen by the caller is `position - buffer.len()`.

use std::io::SeekFrom;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use super::{BodyStream, TransportReader};
use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};

/// Range-addressable object fetch.
#[async_trait]
pub(crate) trait RangedFetch: Send + Sync {
    /// HEAD-equivalent: the object's total size in bytes.
    async fn content_length(&self) -> Result<u64>;

    /// Ranged GET with inclusive bounds (`bytes=start-end`).
    async fn get_range(&self, start: u64, end: u64) -> Result<BodyStream>;
}

pub struct RangedReader {
    fetch: Arc<dyn RangedFetch>,
    content_length: u64,
    position: u64,
    buffer: ByteBuffer,
    body: Option<BodyStream>,
    /// Read-ahead target: reads top the buffer up to this many bytes.
    buffer_size: usize,
}

impl RangedReader {
    /// Opens the object, learning its size with a HEAD-equivalent call.
    ///
    /// No ranged GET is issued yet; a zero-length object never issues one.
    pub(crate) async fn open(fetch: Arc<dyn RangedFetch>, buffer_size: usize) -> Result<Self> {
        let content_length = fetch.content_length().await?;
        Ok(Self {
            fetch,
            content_length,
            position: 0,
            buffer: ByteBuffer::new(),
            body: None,
            buffer_size,
        })
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// The offset the next read will observe.
    pub fn tell(&self) -> u64 {
        self.position - self.buffer.len() as u64
    }

    /// Pulls one chunk from the live body into the buffer.
    ///
    /// Returns `false` when no more bytes are available at the current
    /// position.
    async fn fill(&mut self) -> Result<bool> {
        if self.body.is_none() {
            if self.position >= self.content_length {
                return Ok(false);
            }
            let end = self.content_length - 1;
            self.body = Some(self.fetch.get_range(self.position, end).await?);
        }
        let body = match self.body.as_mut() {
            Some(b) => b,
            None => return Ok(false),
        };
        match body.next().await {
            Some(Ok(chunk)) => {
                self.position += chunk.len() as u64;
                self.buffer.write_bytes(chunk);
                Ok(true)
            }
            Some(Err(e)) => {
                self.body = None;
                Err(e)
            }
            None => {
                self.body = None;
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl TransportReader for RangedReader {
    async fn read(&mut self, len: usize) -> Result<Bytes> {
        let target = if len == 0 { 0 } else { len.max(self.buffer_size) };
        while self.buffer.len() < target {
            if !self.fill().await? {
                break;
            }
        }
        Ok(self.buffer.read(len))
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.content_length as i64 + offset,
            SeekFrom::Current(offset) => self.tell() as i64 + offset,
        };
        if target < 0 {
            return Err(Error::io("seek to negative position"));
        }
        // Past-the-end positions clamp; the next read returns empty.
        let target = (target as u64).min(self.content_length);

        if target == self.tell() {
            return Ok(target);
        }

        self.buffer.clear();
        self.body = None;
        self.position = target;
        Ok(target)
    }

    fn seekable(&self) -> bool {
        true
    }
}
