// src/compression.rs

//! Transparent stream compression.
//!
//! A process-wide registry maps filename extensions to codecs. The
//! dispatcher consults it when opening a location whose path carries a
//! registered suffix; callers extend it at runtime with
//! [`register_compressor`], and entries added later are visible to all
//! subsequent opens.
//!
//! Built-in entries: `.gz` (gzip, default level on write) and `.bz2`
//! (bzip2, level 9 on write).

use std::collections::HashMap;
use std::io::Write as _;
use std::mem;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::transport::{TransportReader, TransportWriter};

/// Compressed bytes pulled from the raw stream per decode step.
const CODEC_CHUNK: usize = 64 * 1024;

/// A reversible byte-stream transformation bound to a filename extension.
///
/// Implementations wrap raw transport streams; the wrapped stream reads
/// decompressed bytes and writes compressed ones. Codecs are stored in a
/// global registry and may be called from multiple tasks, so they must be
/// `Send + Sync`.
pub trait Codec: Send + Sync {
    /// Codec name used in logs (e.g. "gzip").
    fn name(&self) -> &str;

    /// Wraps a raw reader with decompression.
    fn wrap_reader(&self, inner: Box<dyn TransportReader>) -> Box<dyn TransportReader>;

    /// Wraps a raw writer with compression.
    fn wrap_writer(&self, inner: Box<dyn TransportWriter>) -> Box<dyn TransportWriter>;
}

/// Global extension -> codec registry.
static REGISTRY: RwLock<Option<HashMap<String, Arc<dyn Codec>>>> = RwLock::new(None);

fn builtin_codecs() -> HashMap<String, Arc<dyn Codec>> {
    let mut map: HashMap<String, Arc<dyn Codec>> = HashMap::new();
    map.insert(".gz".to_string(), Arc::new(GzipCodec));
    map.insert(".bz2".to_string(), Arc::new(Bzip2Codec));
    map
}

fn registry_snapshot() -> HashMap<String, Arc<dyn Codec>> {
    {
        let lock = REGISTRY.read().unwrap_or_else(|e| e.into_inner());
        if let Some(map) = lock.as_ref() {
            return map.clone();
        }
    }
    let mut lock = REGISTRY.write().unwrap_or_else(|e| e.into_inner());
    lock.get_or_insert_with(builtin_codecs).clone()
}

/// Registers (or overwrites) a codec for `ext`.
///
/// `ext` must include the leading dot, e.g. `".xz"`. Registration is
/// process-wide and visible to all subsequent `open` calls.
///
/// # Panics
///
/// Panics if `ext` does not start with `.`.
pub fn register_compressor(ext: &str, codec: Arc<dyn Codec>) {
    assert!(
        ext.starts_with('.'),
        "codec extension must start with '.', got '{ext}'"
    );
    let mut lock = REGISTRY.write().unwrap_or_else(|e| e.into_inner());
    lock.get_or_insert_with(builtin_codecs)
        .insert(ext.to_string(), codec);
}

/// Looks up the codec registered for `ext` (case-sensitive).
pub fn lookup_compressor(ext: &str) -> Option<Arc<dyn Codec>> {
    registry_snapshot().get(ext).cloned()
}

/// Strips a registered compression suffix from `path`.
///
/// Returns the path without the suffix together with the matching codec, or
/// the path unchanged and `None`. The match is case-sensitive on the dotted
/// suffix; when several registered extensions match, the longest wins.
pub fn strip_compression_suffix(path: &str) -> (&str, Option<Arc<dyn Codec>>) {
    let registry = registry_snapshot();
    let mut best: Option<(&str, Arc<dyn Codec>)> = None;
    for (ext, codec) in &registry {
        if path.ends_with(ext.as_str()) && best.as_ref().map_or(true, |(b, _)| ext.len() > b.len())
        {
            best = Some((&path[..path.len() - ext.len()], codec.clone()));
        }
    }
    match best {
        Some((stripped, codec)) => (stripped, Some(codec)),
        None => (path, None),
    }
}

// ---------------------------------------------------------------------------
// Built-in codecs
// ---------------------------------------------------------------------------

struct GzipCodec;

impl Codec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn wrap_reader(&self, inner: Box<dyn TransportReader>) -> Box<dyn TransportReader> {
        Box::new(CodecReader::new(
            inner,
            Decoder::Gzip(flate2::write::GzDecoder::new(Vec::new())),
        ))
    }

    fn wrap_writer(&self, inner: Box<dyn TransportWriter>) -> Box<dyn TransportWriter> {
        Box::new(CodecWriter::new(
            inner,
            Encoder::Gzip(flate2::write::GzEncoder::new(
                Vec::new(),
                flate2::Compression::default(),
            )),
        ))
    }
}

struct Bzip2Codec;

impl Codec for Bzip2Codec {
    fn name(&self) -> &str {
        "bzip2"
    }

    fn wrap_reader(&self, inner: Box<dyn TransportReader>) -> Box<dyn TransportReader> {
        Box::new(CodecReader::new(
            inner,
            Decoder::Bzip2(bzip2::write::BzDecoder::new(Vec::new())),
        ))
    }

    fn wrap_writer(&self, inner: Box<dyn TransportWriter>) -> Box<dyn TransportWriter> {
        Box::new(CodecWriter::new(
            inner,
            Encoder::Bzip2(bzip2::write::BzEncoder::new(
                Vec::new(),
                bzip2::Compression::new(9),
            )),
        ))
    }
}

/// Push-style compressor over an in-memory sink.
enum Encoder {
    Gzip(flate2::write::GzEncoder<Vec<u8>>),
    Bzip2(bzip2::write::BzEncoder<Vec<u8>>),
}

impl Encoder {
    fn push(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Encoder::Gzip(e) => {
                e.write_all(data)
                    .map_err(|e| Error::io_with_source("gzip compression failed", e))?;
                Ok(mem::take(e.get_mut()))
            }
            Encoder::Bzip2(e) => {
                e.write_all(data)
                    .map_err(|e| Error::io_with_source("bzip2 compression failed", e))?;
                Ok(mem::take(e.get_mut()))
            }
        }
    }

    fn finalize(&mut self) -> Result<Vec<u8>> {
        match self {
            Encoder::Gzip(e) => {
                e.try_finish()
                    .map_err(|e| Error::io_with_source("gzip finalization failed", e))?;
                Ok(mem::take(e.get_mut()))
            }
            Encoder::Bzip2(e) => {
                e.try_finish()
                    .map_err(|e| Error::io_with_source("bzip2 finalization failed", e))?;
                Ok(mem::take(e.get_mut()))
            }
        }
    }
}

/// Push-style decompressor over an in-memory sink.
enum Decoder {
    Gzip(flate2::write::GzDecoder<Vec<u8>>),
    Bzip2(bzip2::write::BzDecoder<Vec<u8>>),
}

impl Decoder {
    fn push(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Decoder::Gzip(d) => {
                d.write_all(data)
                    .map_err(|e| Error::io_with_source("gzip decompression failed", e))?;
                Ok(mem::take(d.get_mut()))
            }
            Decoder::Bzip2(d) => {
                d.write_all(data)
                    .map_err(|e| Error::io_with_source("bzip2 decompression failed", e))?;
                Ok(mem::take(d.get_mut()))
            }
        }
    }

    fn finalize(&mut self) -> Result<Vec<u8>> {
        match self {
            Decoder::Gzip(d) => {
                d.try_finish()
                    .map_err(|e| Error::io_with_source("truncated gzip stream", e))?;
                Ok(mem::take(d.get_mut()))
            }
            Decoder::Bzip2(d) => {
                d.try_finish()
                    .map_err(|e| Error::io_with_source("truncated bzip2 stream", e))?;
                Ok(mem::take(d.get_mut()))
            }
        }
    }
}

/// Decompressing wrapper around a raw transport reader.
struct CodecReader {
    inner: Box<dyn TransportReader>,
    decoder: Option<Decoder>,
    out: ByteBuffer,
}

impl CodecReader {
    fn new(inner: Box<dyn TransportReader>, decoder: Decoder) -> Self {
        Self {
            inner,
            decoder: Some(decoder),
            out: ByteBuffer::new(),
        }
    }
}

#[async_trait]
impl TransportReader for CodecReader {
    async fn read(&mut self, len: usize) -> Result<Bytes> {
        while self.out.len() < len && self.decoder.is_some() {
            let chunk = self.inner.read(CODEC_CHUNK).await?;
            if chunk.is_empty() {
                // Raw stream exhausted: flush whatever the decoder holds.
                if let Some(mut decoder) = self.decoder.take() {
                    let tail = decoder.finalize()?;
                    self.out.write_bytes(tail.into());
                }
                break;
            }
            let decoded = self
                .decoder
                .as_mut()
                .map(|d| d.push(&chunk))
                .transpose()?
                .unwrap_or_default();
            self.out.write_bytes(decoded.into());
        }
        Ok(self.out.read(len))
    }
}

/// Compressing wrapper around a raw transport writer.
struct CodecWriter {
    inner: Option<Box<dyn TransportWriter>>,
    encoder: Encoder,
    bytes_in: u64,
}

impl CodecWriter {
    fn new(inner: Box<dyn TransportWriter>, encoder: Encoder) -> Self {
        Self {
            inner: Some(inner),
            encoder,
            bytes_in: 0,
        }
    }
}

#[async_trait]
impl TransportWriter for CodecWriter {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| Error::io("write on a finished stream"))?;
        let compressed = self.encoder.push(data)?;
        if !compressed.is_empty() {
            inner.write_all(&compressed).await?;
        }
        self.bytes_in += data.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        let mut inner = self
            .inner
            .take()
            .ok_or_else(|| Error::io("finish on a finished stream"))?;
        let tail = self.encoder.finalize()?;
        if !tail.is_empty() {
            inner.write_all(&tail).await?;
        }
        inner.finish().await
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_in
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory reader serving fixed-size chunks.
    struct MemReader {
        data: Vec<u8>,
        pos: usize,
    }

    impl MemReader {
        fn new(data: Vec<u8>) -> Self {
            Self { data, pos: 0 }
        }
    }

    #[async_trait]
    impl TransportReader for MemReader {
        async fn read(&mut self, len: usize) -> Result<Bytes> {
            let end = (self.pos + len).min(self.data.len());
            let chunk = Bytes::copy_from_slice(&self.data[self.pos..end]);
            self.pos = end;
            Ok(chunk)
        }
    }

    /// In-memory writer collecting into shared storage.
    struct MemWriter {
        sink: Arc<Mutex<Vec<u8>>>,
        written: u64,
    }

    #[async_trait]
    impl TransportWriter for MemWriter {
        async fn write_all(&mut self, data: &[u8]) -> Result<()> {
            self.sink.lock().unwrap().extend_from_slice(data);
            self.written += data.len() as u64;
            Ok(())
        }

        async fn finish(self: Box<Self>) -> Result<()> {
            Ok(())
        }

        fn bytes_written(&self) -> u64 {
            self.written
        }
    }

    fn mem_writer() -> (Box<dyn TransportWriter>, Arc<Mutex<Vec<u8>>>) {
        let sink = Arc::new(Mutex::new(Vec::new()));
        (
            Box::new(MemWriter {
                sink: sink.clone(),
                written: 0,
            }),
            sink,
        )
    }

    async fn roundtrip(ext: &str, payload: &[u8]) -> Vec<u8> {
        let codec = lookup_compressor(ext).unwrap();

        let (raw, sink) = mem_writer();
        let mut writer = codec.wrap_writer(raw);
        // Write in awkward chunk sizes to cross codec block boundaries.
        for chunk in payload.chunks(7) {
            writer.write_all(chunk).await.unwrap();
        }
        writer.finish().await.unwrap();

        let compressed = sink.lock().unwrap().clone();
        let mut reader = codec.wrap_reader(Box::new(MemReader::new(compressed)));
        let mut out = Vec::new();
        loop {
            let chunk = reader.read(11).await.unwrap();
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_gzip_roundtrip() {
        let payload: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
        assert_eq!(roundtrip(".gz", &payload).await, payload);
    }

    #[tokio::test]
    async fn test_bzip2_roundtrip() {
        let payload = b"the quick brown fox jumps over the lazy dog\n".repeat(100);
        assert_eq!(roundtrip(".bz2", &payload).await, payload);
    }

    #[tokio::test]
    async fn test_gzip_output_has_magic() {
        let codec = lookup_compressor(".gz").unwrap();
        let (raw, sink) = mem_writer();
        let mut writer = codec.wrap_writer(raw);
        writer.write_all(b"hello\n").await.unwrap();
        writer.finish().await.unwrap();

        let compressed = sink.lock().unwrap().clone();
        assert!(compressed.len() > 2);
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
    }

    #[tokio::test]
    async fn test_empty_payload_roundtrip() {
        assert!(roundtrip(".gz", b"").await.is_empty());
        assert!(roundtrip(".bz2", b"").await.is_empty());
    }

    #[test]
    fn test_strip_compression_suffix() {
        let (inner, codec) = strip_compression_suffix("data/report.csv.gz");
        assert_eq!(inner, "data/report.csv");
        assert_eq!(codec.unwrap().name(), "gzip");

        let (inner, codec) = strip_compression_suffix("archive.bz2");
        assert_eq!(inner, "archive");
        assert_eq!(codec.unwrap().name(), "bzip2");

        let (inner, codec) = strip_compression_suffix("plain.txt");
        assert_eq!(inner, "plain.txt");
        assert!(codec.is_none());
    }

    #[test]
    fn test_suffix_match_is_case_sensitive() {
        let (inner, codec) = strip_compression_suffix("upper.GZ");
        assert_eq!(inner, "upper.GZ");
        assert!(codec.is_none());
    }

    struct IdentityCodec;

    impl Codec for IdentityCodec {
        fn name(&self) -> &str {
            "identity"
        }
        fn wrap_reader(&self, inner: Box<dyn TransportReader>) -> Box<dyn TransportReader> {
            inner
        }
        fn wrap_writer(&self, inner: Box<dyn TransportWriter>) -> Box<dyn TransportWriter> {
            inner
        }
    }

    #[test]
    fn test_register_custom_codec() {
        register_compressor(".ident", Arc::new(IdentityCodec));
        let (inner, codec) = strip_compression_suffix("file.ident");
        assert_eq!(inner, "file");
        assert_eq!(codec.unwrap().name(), "identity");

        // Overwrite is allowed.
        register_compressor(".ident", Arc::new(IdentityCodec));
        assert!(lookup_compressor(".ident").is_some());
    }

    #[test]
    #[should_panic(expected = "must start with '.'")]
    fn test_register_without_dot_panics() {
        register_compressor("gz", Arc::new(IdentityCodec));
    }
}
