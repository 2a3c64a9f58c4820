// src/lib.rs

//! Unified streaming I/O over heterogeneous storage.
//!
//! One `open()` call gives a file-like byte stream over local files,
//! HTTP(S), S3, Google Cloud Storage, HDFS/WebHDFS and SFTP, with stream
//! compression layered transparently by filename extension. Backends sit
//! behind shared reader/writer traits; codecs are process-wide and
//! extensible at runtime.
//!
//! # Features
//!
//! - `s3` (default): S3 backend and the parallel bucket iterator
//! - `http`, `webhdfs`, `gcs` (default): reqwest-based backends
//! - `hdfs` (default): reads/writes piped through the `hdfs` CLI
//! - `ssh` (default): SFTP backend
//!
//! The local backend and the gzip/bzip2 codecs are always available.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> unistream::Result<()> {
//! // Transparent gzip by extension.
//! let mut writer = unistream::open("./hello.txt.gz", "wb")
//!     .await?
//!     .into_writer()?;
//! writer.write(b"hello\n").await?;
//! writer.close().await?;
//!
//! // Seekable S3 read stream.
//! let mut reader = unistream::open("s3://bucket/key.bin", "rb")
//!     .await?
//!     .into_reader()?;
//! reader.seek(std::io::SeekFrom::Start(1024)).await?;
//! let chunk = reader.read(4096).await?;
//! # let _ = chunk;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod compression;
pub mod error;
pub mod mode;
pub mod open;
pub mod params;
pub mod retry;
pub mod text;
pub mod transport;
pub mod uri;

pub use error::{Error, Result};

pub use open::{open, open_with, OpenOptions, Reader, Stream, Writer};

pub use buffer::ByteBuffer;
pub use mode::{Direction, Mode};
pub use uri::{parse_uri, Location};

pub use compression::{
    lookup_compressor, register_compressor, strip_compression_suffix, Codec,
};

pub use params::{
    GcsParams, HttpParams, LocalParams, S3Params, SshParams, TransportParams, WebHdfsParams,
    DEFAULT_MIN_PART_SIZE,
};

pub use retry::RetryPolicy;
pub use text::{Encoding, ErrorPolicy, TextConfig};
pub use transport::{BodyStream, TransportReader, TransportWriter};

#[cfg(feature = "s3")]
pub use transport::s3::bucket::{iter_bucket, AcceptKey, BucketStream, IterBucketParams};
#[cfg(feature = "s3")]
pub use transport::s3::UploadPart;
