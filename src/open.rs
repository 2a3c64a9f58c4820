// src/open.rs

//! The `open` entry point and the stream handles it returns.
//!
//! `open` parses the location, selects a backend, opens the raw byte stream
//! in the requested direction, wraps it with the codec chosen by extension
//! (unless `ignore_ext`), and attaches the text configuration for text
//! modes. Closing the returned handle closes every layer bottom-up.

use std::io::SeekFrom;

use bytes::Bytes;

use crate::buffer::ByteBuffer;
use crate::compression::strip_compression_suffix;
use crate::error::{Error, Result};
use crate::mode::{Direction, Mode};
use crate::params::TransportParams;
use crate::text::TextConfig;
use crate::transport::{self, TransportReader, TransportWriter};
use crate::uri::{parse_uri, Location};

/// Options for [`open_with`].
#[derive(Debug, Default)]
pub struct OpenOptions {
    /// Skip extension-based codec selection.
    pub ignore_ext: bool,
    /// Text-mode character encoding (default UTF-8).
    pub encoding: Option<String>,
    /// Text-mode decode error policy: `strict`, `replace` or `ignore`.
    pub errors: Option<String>,
    /// Text-mode newline; unset requests universal newlines on read.
    pub newline: Option<String>,
    /// Per-backend transport parameters.
    pub params: TransportParams,
}

/// A stream returned by [`open`]: a reader or a writer, per the mode.
pub enum Stream {
    Reader(Reader),
    Writer(Writer),
}

impl Stream {
    /// # Errors
    ///
    /// Returns `InvalidMode` if the stream was opened for writing.
    pub fn into_reader(self) -> Result<Reader> {
        match self {
            Stream::Reader(reader) => Ok(reader),
            Stream::Writer(_) => Err(Error::invalid_mode("w", "stream was opened for writing")),
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidMode` if the stream was opened for reading.
    pub fn into_writer(self) -> Result<Writer> {
        match self {
            Stream::Writer(writer) => Ok(writer),
            Stream::Reader(_) => Err(Error::invalid_mode("r", "stream was opened for reading")),
        }
    }
}

/// Opens `uri` with default options.
///
/// # Errors
///
/// See [`open_with`].
pub async fn open(uri: &str, mode: &str) -> Result<Stream> {
    open_with(uri, mode, OpenOptions::default()).await
}

/// Opens `uri` in `mode` with explicit options.
///
/// # Errors
///
/// Returns `InvalidMode` for an unparseable mode or a direction the backend
/// does not support, `MalformedUri`/`UnsupportedScheme` from URI parsing,
/// `LimitExceeded` for out-of-bounds parameters, and `Transport`/`Io` when
/// the backend cannot open the stream.
pub async fn open_with(uri: &str, mode: &str, options: OpenOptions) -> Result<Stream> {
    let mode = Mode::parse(mode)?;
    let text = if mode.binary {
        None
    } else {
        Some(TextConfig::new(
            options.encoding.as_deref(),
            options.errors.as_deref(),
            options.newline.as_deref(),
        )?)
    };

    let location = parse_uri(uri)?;
    options.params.validate()?;
    options.params.warn_unused(location.backend());

    let codec = if options.ignore_ext {
        None
    } else {
        location
            .key_path()
            .and_then(|path| strip_compression_suffix(path).1)
    };

    match mode.direction {
        Direction::Read => {
            let raw = open_raw_reader(uri, &location, &options.params).await?;
            let wrapped = match codec {
                Some(codec) => {
                    tracing::debug!(codec = codec.name(), "wrapping read stream");
                    codec.wrap_reader(raw)
                }
                None => raw,
            };
            Ok(Stream::Reader(Reader::new(wrapped, text)))
        }
        Direction::Write | Direction::Append => {
            let raw = open_raw_writer(uri, &location, mode, &options.params).await?;
            let wrapped = match codec {
                Some(codec) => {
                    tracing::debug!(codec = codec.name(), "wrapping write stream");
                    codec.wrap_writer(raw)
                }
                None => raw,
            };
            Ok(Stream::Writer(Writer::new(wrapped, text)))
        }
    }
}

async fn open_raw_reader(
    uri: &str,
    location: &Location,
    params: &TransportParams,
) -> Result<Box<dyn TransportReader>> {
    match location {
        Location::Local { path } => transport::local::open_read(path, &params.local).await,

        Location::Http { url } => {
            #[cfg(feature = "http")]
            {
                Ok(Box::new(
                    transport::http::HttpReader::open(url.clone(), &params.http).await?,
                ))
            }
            #[cfg(not(feature = "http"))]
            {
                let _ = url;
                Err(Error::unsupported_scheme("http"))
            }
        }

        Location::S3 {
            bucket,
            key,
            access_key,
            secret_key,
            endpoint_host,
            endpoint_port,
            version_id,
        } => {
            #[cfg(feature = "s3")]
            {
                if key.is_empty() {
                    return Err(Error::malformed_uri(uri, "missing object key"));
                }
                let client = transport::s3::build_client(
                    access_key.as_deref(),
                    secret_key.as_deref(),
                    endpoint_host.as_deref(),
                    *endpoint_port,
                    &params.s3,
                )
                .await?;
                let version_id = version_id.clone().or_else(|| params.s3.version_id.clone());
                let api = std::sync::Arc::new(transport::s3::SdkApi::new(
                    client,
                    bucket.clone(),
                    key.clone(),
                    version_id,
                ));
                Ok(Box::new(
                    transport::ranged::RangedReader::open(api, params.s3.buffer_size).await?,
                ))
            }
            #[cfg(not(feature = "s3"))]
            {
                let _ = (bucket, key, access_key, secret_key, endpoint_host, endpoint_port, version_id, uri);
                Err(Error::unsupported_scheme("s3"))
            }
        }

        Location::Gcs { bucket, blob } => {
            #[cfg(feature = "gcs")]
            {
                if blob.is_empty() {
                    return Err(Error::malformed_uri(uri, "missing blob name"));
                }
                let fetch = std::sync::Arc::new(transport::gcs::GcsFetch::new(
                    bucket.clone(),
                    blob.clone(),
                    &params.gcs,
                    params.http.client.clone(),
                ));
                Ok(Box::new(
                    transport::ranged::RangedReader::open(fetch, params.gcs.buffer_size).await?,
                ))
            }
            #[cfg(not(feature = "gcs"))]
            {
                let _ = (bucket, blob, uri);
                Err(Error::unsupported_scheme("gs"))
            }
        }

        Location::Hdfs { path } => {
            #[cfg(feature = "hdfs")]
            {
                Ok(Box::new(transport::hdfs::HdfsReader::open(path)?))
            }
            #[cfg(not(feature = "hdfs"))]
            {
                let _ = path;
                Err(Error::unsupported_scheme("hdfs"))
            }
        }

        Location::WebHdfs { host, port, path } => {
            #[cfg(feature = "webhdfs")]
            {
                Ok(Box::new(
                    transport::webhdfs::WebHdfsReader::open(host, *port, path, &params.webhdfs)
                        .await?,
                ))
            }
            #[cfg(not(feature = "webhdfs"))]
            {
                let _ = (host, port, path);
                Err(Error::unsupported_scheme("webhdfs"))
            }
        }

        Location::Ssh {
            user,
            password,
            host,
            port,
            path,
        } => {
            #[cfg(feature = "ssh")]
            {
                let target = transport::ssh::SshTarget::resolve(
                    host,
                    *port,
                    user.as_deref(),
                    password.as_deref(),
                    path,
                    &params.ssh,
                )?;
                Ok(Box::new(transport::ssh::SshReader::open(target).await?))
            }
            #[cfg(not(feature = "ssh"))]
            {
                let _ = (user, password, host, port, path);
                Err(Error::unsupported_scheme("ssh"))
            }
        }
    }
}

async fn open_raw_writer(
    uri: &str,
    location: &Location,
    mode: Mode,
    params: &TransportParams,
) -> Result<Box<dyn TransportWriter>> {
    let append = mode.is_append();
    match location {
        Location::Local { path } => {
            transport::local::open_write(path, append, &params.local).await
        }

        Location::Http { .. } => Err(Error::invalid_mode(
            if append { "a" } else { "w" },
            "the HTTP backend is read-only",
        )),

        Location::S3 {
            bucket,
            key,
            access_key,
            secret_key,
            endpoint_host,
            endpoint_port,
            ..
        } => {
            if append {
                return Err(Error::invalid_mode("a", "S3 objects cannot be appended to"));
            }
            #[cfg(feature = "s3")]
            {
                if key.is_empty() {
                    return Err(Error::malformed_uri(uri, "missing object key"));
                }
                let client = transport::s3::build_client(
                    access_key.as_deref(),
                    secret_key.as_deref(),
                    endpoint_host.as_deref(),
                    *endpoint_port,
                    &params.s3,
                )
                .await?;
                let api = std::sync::Arc::new(transport::s3::SdkApi::new(
                    client,
                    bucket.clone(),
                    key.clone(),
                    None,
                ));
                Ok(Box::new(transport::s3::writer::S3Writer::new(
                    api, &params.s3,
                )?))
            }
            #[cfg(not(feature = "s3"))]
            {
                let _ = (bucket, key, access_key, secret_key, endpoint_host, endpoint_port, uri);
                Err(Error::unsupported_scheme("s3"))
            }
        }

        Location::Gcs { bucket, blob } => {
            if append {
                return Err(Error::invalid_mode("a", "GCS blobs cannot be appended to"));
            }
            #[cfg(feature = "gcs")]
            {
                if blob.is_empty() {
                    return Err(Error::malformed_uri(uri, "missing blob name"));
                }
                Ok(Box::new(
                    transport::gcs::GcsWriter::open(bucket, blob, &params.gcs).await?,
                ))
            }
            #[cfg(not(feature = "gcs"))]
            {
                let _ = (bucket, blob, uri);
                Err(Error::unsupported_scheme("gs"))
            }
        }

        Location::Hdfs { path } => {
            #[cfg(feature = "hdfs")]
            {
                if append {
                    return Err(Error::invalid_mode(
                        "a",
                        "append is not supported through the HDFS CLI pipe",
                    ));
                }
                Ok(Box::new(transport::hdfs::HdfsWriter::open(path)?))
            }
            #[cfg(not(feature = "hdfs"))]
            {
                let _ = path;
                Err(Error::unsupported_scheme("hdfs"))
            }
        }

        Location::WebHdfs { host, port, path } => {
            if append {
                return Err(Error::invalid_mode(
                    "a",
                    "append mode is not supported on WebHDFS",
                ));
            }
            #[cfg(feature = "webhdfs")]
            {
                Ok(Box::new(transport::webhdfs::WebHdfsWriter::new(
                    host,
                    *port,
                    path,
                    &params.webhdfs,
                )?))
            }
            #[cfg(not(feature = "webhdfs"))]
            {
                let _ = (host, port, path);
                Err(Error::unsupported_scheme("webhdfs"))
            }
        }

        Location::Ssh {
            user,
            password,
            host,
            port,
            path,
        } => {
            #[cfg(feature = "ssh")]
            {
                let target = transport::ssh::SshTarget::resolve(
                    host,
                    *port,
                    user.as_deref(),
                    password.as_deref(),
                    path,
                    &params.ssh,
                )?;
                Ok(Box::new(
                    transport::ssh::SshWriter::open(target, mode.direction).await?,
                ))
            }
            #[cfg(not(feature = "ssh"))]
            {
                let _ = (user, password, host, port, path);
                Err(Error::unsupported_scheme("ssh"))
            }
        }
    }
}

/// Read handle over any backend, with line-oriented helpers.
pub struct Reader {
    inner: Option<Box<dyn TransportReader>>,
    /// Lookahead pulled from the transport but not yet returned.
    buffer: ByteBuffer,
    /// Logical position: bytes returned to the caller plus seeks.
    pos: u64,
    text: TextConfig,
}

impl Reader {
    fn new(inner: Box<dyn TransportReader>, text: Option<TextConfig>) -> Self {
        Self {
            inner: Some(inner),
            buffer: ByteBuffer::new(),
            pos: 0,
            text: text.unwrap_or_default(),
        }
    }

    /// Wraps a caller-supplied transport stream, bypassing backend
    /// selection.
    pub fn from_transport(inner: Box<dyn TransportReader>) -> Self {
        Self::new(inner, None)
    }

    fn inner_mut(&mut self) -> Result<&mut Box<dyn TransportReader>> {
        self.inner
            .as_mut()
            .ok_or_else(|| Error::io("stream is closed"))
    }

    /// Reads up to `len` bytes; empty means end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is closed or the backend read fails.
    pub async fn read(&mut self, len: usize) -> Result<Bytes> {
        while self.buffer.len() < len {
            let want = len - self.buffer.len();
            let chunk = self.inner_mut()?.read(want).await?;
            if chunk.is_empty() {
                break;
            }
            self.buffer.write_bytes(chunk);
        }
        let out = self.buffer.read(len);
        self.pos += out.len() as u64;
        Ok(out)
    }

    /// Reads until end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is closed or the backend read fails.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        let mut out = ByteBuffer::new();
        loop {
            let chunk = self.read(transport::DEFAULT_BUFFER_SIZE).await?;
            if chunk.is_empty() {
                break;
            }
            out.write_bytes(chunk);
        }
        let len = out.len();
        Ok(out.read(len))
    }

    /// Reads one line including its terminator; empty at end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is closed or the backend read fails.
    pub async fn read_line(&mut self) -> Result<Bytes> {
        loop {
            if let Some(idx) = self.buffer.find_byte(b'\n') {
                let line = self.buffer.read(idx + 1);
                self.pos += line.len() as u64;
                return Ok(line);
            }
            let chunk = self.inner_mut()?.read(transport::DEFAULT_BUFFER_SIZE).await?;
            if chunk.is_empty() {
                let rest = self.buffer.read(self.buffer.len());
                self.pos += rest.len() as u64;
                return Ok(rest);
            }
            self.buffer.write_bytes(chunk);
        }
    }

    /// Reads the remainder of the stream as text.
    ///
    /// # Errors
    ///
    /// Returns an error on read failure or when decoding fails under the
    /// strict policy.
    pub async fn read_to_string(&mut self) -> Result<String> {
        let bytes = self.read_to_end().await?;
        self.text.decode(&bytes)
    }

    /// Reads one line as text; `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error on read failure or when decoding fails under the
    /// strict policy.
    pub async fn read_line_str(&mut self) -> Result<Option<String>> {
        let line = self.read_line().await?;
        if line.is_empty() {
            return Ok(None);
        }
        self.text.decode(&line).map(Some)
    }

    /// Repositions the stream, discarding the lookahead buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is closed or the backend does not
    /// support seeking.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        // The transport sits ahead of the caller by the buffered bytes.
        let buffered = self.buffer.len() as i64;
        let adjusted = match pos {
            SeekFrom::Current(delta) => SeekFrom::Current(delta - buffered),
            other => other,
        };
        let new_pos = self.inner_mut()?.seek(adjusted).await?;
        self.buffer.clear();
        self.pos = new_pos;
        Ok(new_pos)
    }

    /// The current logical position.
    pub fn tell(&self) -> u64 {
        self.pos
    }

    pub fn seekable(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.seekable())
    }

    /// Releases the underlying stream. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        self.inner = None;
        self.buffer.clear();
        Ok(())
    }
}

/// Write handle over any backend.
pub struct Writer {
    inner: Option<Box<dyn TransportWriter>>,
    final_written: u64,
    text: TextConfig,
}

impl Writer {
    fn new(inner: Box<dyn TransportWriter>, text: Option<TextConfig>) -> Self {
        Self {
            inner: Some(inner),
            final_written: 0,
            text: text.unwrap_or_default(),
        }
    }

    /// Wraps a caller-supplied transport stream, bypassing backend
    /// selection.
    pub fn from_transport(inner: Box<dyn TransportWriter>) -> Self {
        Self::new(inner, None)
    }

    /// Appends bytes to the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is closed or the backend write fails.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| Error::io("stream is closed"))?;
        inner.write_all(data).await?;
        Ok(data.len())
    }

    /// Appends text, applying the configured newline substitution and
    /// encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the backend write fails.
    pub async fn write_str(&mut self, text: &str) -> Result<usize> {
        let bytes = self.text.encode(text)?;
        self.write(&bytes).await
    }

    /// Bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.inner
            .as_ref()
            .map_or(self.final_written, |inner| inner.bytes_written())
    }

    /// Finalizes the stream. Idempotent: the first call persists the data,
    /// later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend's finalization protocol fails; the
    /// stream is released either way.
    pub async fn close(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(inner) => {
                self.final_written = inner.bytes_written();
                inner.finish().await
            }
            None => Ok(()),
        }
    }

    /// Drops the stream without finalizing it, triggering the backend's
    /// abort semantics (e.g. `AbortMultipartUpload`).
    pub fn abort(&mut self) {
        if let Some(inner) = self.inner.take() {
            self.final_written = inner.bytes_written();
            drop(inner);
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if self.inner.is_some() {
            tracing::warn!("write stream dropped without close; upload aborted if in flight");
        }
    }
}
