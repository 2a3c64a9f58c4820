// src/transport/gcs.rs

//! Google Cloud Storage backend.
//!
//! Reads go through the media-download endpoint behind the shared
//! [`RangedReader`](super::ranged::RangedReader) shape. Writes use the
//! resumable-upload protocol: a session URI is requested up front, buffered
//! chunks are flushed on 256 KiB-aligned boundaries with `Content-Range:
//! bytes a-b/*` (the service answers 308 for each accepted chunk), and the
//! final chunk carries the total size. Dropping an unfinished writer
//! cancels the session best-effort.

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::StatusCode;

use super::ranged::RangedFetch;
use super::{BodyStream, TransportWriter};
use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::params::{GcsParams, GCS_CHUNK_ALIGNMENT};

pub(crate) const BACKEND: &str = "gcs";
const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Percent-encodes an object name for use as a single URL path segment.
fn encode_component(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn bearer(request: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Media-download fetch behind the shared ranged reader.
pub(crate) struct GcsFetch {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    blob: String,
    token: Option<String>,
}

impl GcsFetch {
    pub(crate) fn new(
        bucket: String,
        blob: String,
        params: &GcsParams,
        client: Option<reqwest::Client>,
    ) -> Self {
        Self {
            client: client.unwrap_or_default(),
            endpoint: params
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            bucket,
            blob,
            token: params.token.clone(),
        }
    }

    fn metadata_url(&self) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}?fields=size",
            self.endpoint,
            self.bucket,
            encode_component(&self.blob)
        )
    }

    fn media_url(&self) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}?alt=media",
            self.endpoint,
            self.bucket,
            encode_component(&self.blob)
        )
    }
}

#[async_trait]
impl RangedFetch for GcsFetch {
    async fn content_length(&self) -> Result<u64> {
        let url = self.metadata_url();
        let response = bearer(self.client.get(&url), self.token.as_deref())
            .send()
            .await
            .map_err(|e| Error::transport_with_source(BACKEND, format!("GET {url} failed"), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(
                BACKEND,
                format!("metadata request returned {status}"),
            ));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::transport_with_source(BACKEND, "invalid metadata body", e))?;
        // The JSON API reports size as a decimal string.
        body.get("size")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::transport(BACKEND, "metadata body lacks object size"))
    }

    async fn get_range(&self, start: u64, end: u64) -> Result<BodyStream> {
        let url = self.media_url();
        let response = bearer(self.client.get(&url), self.token.as_deref())
            .header(RANGE, format!("bytes={start}-{end}"))
            .send()
            .await
            .map_err(|e| Error::transport_with_source(BACKEND, format!("GET {url} failed"), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(
                BACKEND,
                format!("media download returned {status}"),
            ));
        }
        let stream = response
            .bytes_stream()
            .map_err(|e| Error::transport_with_source(BACKEND, "response body read failed", e));
        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Completed,
    Aborted,
}

pub struct GcsWriter {
    /// 308 responses must reach us, so this client never follows redirects.
    client: reqwest::Client,
    session_uri: String,
    token: Option<String>,
    chunk_size: usize,
    buffer: ByteBuffer,
    /// Bytes already accepted by the service.
    offset: u64,
    written: u64,
    state: WriterState,
}

/// Aligns a chunk size down to the service's 256 KiB requirement.
fn align_chunk(size: usize) -> usize {
    (size / GCS_CHUNK_ALIGNMENT).max(1) * GCS_CHUNK_ALIGNMENT
}

/// `Content-Range` for a non-final chunk of known offset and length.
fn chunk_range(offset: u64, len: usize) -> String {
    format!("bytes {}-{}/*", offset, offset + len as u64 - 1)
}

/// `Content-Range` for the final chunk.
fn final_range(offset: u64, len: usize, total: u64) -> String {
    if len == 0 {
        format!("bytes */{total}")
    } else {
        format!("bytes {}-{}/{}", offset, offset + len as u64 - 1, total)
    }
}

impl GcsWriter {
    /// Requests a resumable-upload session.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the session cannot be created.
    pub(crate) async fn open(
        bucket: &str,
        blob: &str,
        params: &GcsParams,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::transport_with_source(BACKEND, "failed to build client", e))?;
        let endpoint = params
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let url = format!(
            "{endpoint}/upload/storage/v1/b/{bucket}/o?uploadType=resumable&name={}",
            encode_component(blob)
        );

        let response = bearer(client.post(&url), params.token.as_deref())
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|e| Error::transport_with_source(BACKEND, format!("POST {url} failed"), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(
                BACKEND,
                format!("resumable session request returned {status}"),
            ));
        }
        let session_uri = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::transport(BACKEND, "session response lacks Location header"))?;

        Ok(Self {
            client,
            session_uri,
            token: params.token.clone(),
            chunk_size: align_chunk(params.min_part_size),
            buffer: ByteBuffer::new(),
            offset: 0,
            written: 0,
            state: WriterState::Open,
        })
    }

    async fn flush_chunk(&mut self) -> Result<()> {
        let len = self.chunk_size;
        let data = self.buffer.read(len);
        let range = chunk_range(self.offset, data.len());

        let response = bearer(self.client.put(&self.session_uri), self.token.as_deref())
            .header(CONTENT_RANGE, range)
            .body(data)
            .send()
            .await
            .map_err(|e| {
                Error::transport_with_source(BACKEND, "chunk upload failed", e)
            });

        let outcome = match response {
            Ok(response) => {
                let status = response.status();
                // 308 acknowledges a non-final chunk.
                if status == StatusCode::PERMANENT_REDIRECT || status.is_success() {
                    Ok(())
                } else {
                    Err(Error::transport(
                        BACKEND,
                        format!("chunk upload returned {status}"),
                    ))
                }
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.offset += len as u64;
                Ok(())
            }
            Err(e) => {
                self.cancel_best_effort().await;
                Err(e)
            }
        }
    }

    /// Cancels the upload session; failures are logged, never re-raised.
    async fn cancel_best_effort(&mut self) {
        self.state = WriterState::Aborted;
        let request = bearer(self.client.delete(&self.session_uri), self.token.as_deref());
        if let Err(e) = request.send().await {
            tracing::warn!(error = %e, "failed to cancel resumable upload");
        }
    }
}

#[async_trait]
impl TransportWriter for GcsWriter {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self.state {
            WriterState::Open => {}
            _ => return Err(Error::io("write on a finished stream")),
        }
        self.buffer.write(data);
        self.written += data.len() as u64;
        while self.buffer.len() >= self.chunk_size {
            self.flush_chunk().await?;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        match self.state {
            WriterState::Open => {}
            WriterState::Completed => return Ok(()),
            WriterState::Aborted => return Err(Error::io("finish on an aborted stream")),
        }

        let remainder = self.buffer.len();
        let total = self.offset + remainder as u64;
        let data = self.buffer.read(remainder);
        let range = final_range(self.offset, remainder, total);

        let response = bearer(self.client.put(&self.session_uri), self.token.as_deref())
            .header(CONTENT_RANGE, range)
            .body(data)
            .send()
            .await
            .map_err(|e| Error::transport_with_source(BACKEND, "final chunk upload failed", e));

        match response {
            Ok(response) if response.status().is_success() => {
                self.state = WriterState::Completed;
                Ok(())
            }
            Ok(response) => {
                let status = response.status();
                self.cancel_best_effort().await;
                Err(Error::transport(
                    BACKEND,
                    format!("finalization returned {status}"),
                ))
            }
            Err(e) => {
                self.cancel_best_effort().await;
                Err(e)
            }
        }
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl Drop for GcsWriter {
    fn drop(&mut self) {
        if self.state != WriterState::Open {
            return;
        }
        tracing::warn!("GCS writer dropped without finish; canceling upload session");
        let request = bearer(self.client.delete(&self.session_uri), self.token.as_deref());
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = request.send().await {
                    tracing::warn!(error = %e, "failed to cancel resumable upload");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_component() {
        assert_eq!(encode_component("plain-name_1.txt"), "plain-name_1.txt");
        assert_eq!(encode_component("a/b c"), "a%2Fb%20c");
        assert_eq!(encode_component("näme"), "n%C3%A4me");
    }

    #[test]
    fn test_align_chunk() {
        assert_eq!(align_chunk(GCS_CHUNK_ALIGNMENT), GCS_CHUNK_ALIGNMENT);
        assert_eq!(align_chunk(GCS_CHUNK_ALIGNMENT + 1), GCS_CHUNK_ALIGNMENT);
        assert_eq!(align_chunk(50 * 1024 * 1024), 50 * 1024 * 1024);
        assert_eq!(
            align_chunk(50 * 1024 * 1024 + 123),
            50 * 1024 * 1024
        );
        // Never rounds down to zero.
        assert_eq!(align_chunk(100), GCS_CHUNK_ALIGNMENT);
    }

    #[test]
    fn test_chunk_range_headers() {
        assert_eq!(chunk_range(0, 262_144), "bytes 0-262143/*");
        assert_eq!(chunk_range(262_144, 262_144), "bytes 262144-524287/*");
    }

    #[test]
    fn test_final_range_headers() {
        assert_eq!(final_range(0, 0, 0), "bytes */0");
        assert_eq!(final_range(524_288, 100, 524_388), "bytes 524288-524387/524388");
        // Everything already flushed: finalize without a body.
        assert_eq!(final_range(524_288, 0, 524_288), "bytes */524288");
    }
}
