// src/transport/mod.rs

//! Transport backends and the stream-capability traits they implement.
//!
//! Every backend produces byte streams behind the same two object-safe
//! traits so the dispatcher and the codec layer can compose them without
//! knowing which service is underneath. Readers hand out chunks; writers
//! consume appends and finalize on `finish`.

use std::io::SeekFrom;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::error::{Error, Result};

pub mod local;
pub mod ranged;

#[cfg(feature = "hdfs")]
pub mod hdfs;
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "s3")]
pub mod s3;
#[cfg(feature = "ssh")]
pub mod ssh;
#[cfg(feature = "webhdfs")]
pub mod webhdfs;

#[cfg(feature = "gcs")]
pub mod gcs;

/// A chunked body from a transport client.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Default chunk size for transport reads.
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;

/// A handle for reading a raw byte stream from a backend.
///
/// Implementations are single-threaded: one instance is owned and driven by
/// exactly one task. Dropping a reader releases its underlying connection.
#[async_trait]
pub trait TransportReader: Send {
    /// Reads up to `len` bytes from the current position.
    ///
    /// An empty result means end of stream. Short reads are allowed
    /// whenever the backend has fewer bytes immediately available than
    /// requested but is not yet at end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails.
    async fn read(&mut self, len: usize) -> Result<Bytes>;

    /// Repositions the stream, returning the new absolute offset.
    ///
    /// # Errors
    ///
    /// Backends that cannot reposition return an `Io` error; see
    /// [`TransportReader::seekable`].
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let _ = pos;
        Err(Error::io("seek is not supported by this stream"))
    }

    /// Whether [`TransportReader::seek`] is supported.
    fn seekable(&self) -> bool {
        false
    }
}

/// A handle for writing a raw byte stream to a backend.
///
/// Writes are append-only. `finish` must be called to persist the result;
/// backends with multi-request upload protocols treat a drop without
/// `finish` as an abort.
#[async_trait]
pub trait TransportWriter: Send {
    /// Appends `data` to the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails; after an error the
    /// writer is poisoned and further writes fail.
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Finalizes the stream, ensuring all data is persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or the backend's finalization protocol
    /// fails.
    async fn finish(self: Box<Self>) -> Result<()>;

    /// Number of payload bytes accepted so far.
    fn bytes_written(&self) -> u64;
}
