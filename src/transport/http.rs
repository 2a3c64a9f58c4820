// src/transport/http.rs

//! HTTP(S) backend, read-only.
//!
//! Opens with a single GET carrying `Accept-Encoding: identity` so the
//! server does not stack its own compression under the codec layer. Seeks
//! are emulated: the live body is dropped and the next read re-issues a GET
//! with a `Range` header. A server that answers 200 instead of 206 gets the
//! slow path, where the reader discards bytes until the requested offset.

use std::io::SeekFrom;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, RANGE};
use reqwest::StatusCode;

use super::{BodyStream, TransportReader};
use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::params::HttpParams;

pub(crate) const BACKEND: &str = "http";

pub struct HttpReader {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    auth: Option<(String, Option<String>)>,
    content_length: Option<u64>,
    /// Far end of the bytes pulled into the buffer, as an object offset.
    position: u64,
    buffer: ByteBuffer,
    body: Option<BodyStream>,
    /// Bytes still to drop from the current body (200-response slow path).
    skip_remaining: u64,
    /// The current body ended and no re-request is warranted.
    exhausted: bool,
    /// Read-ahead target: reads top the buffer up to this many bytes.
    buffer_size: usize,
}

impl HttpReader {
    /// Issues the initial GET and starts streaming the body.
    ///
    /// # Errors
    ///
    /// Returns `Transport` on connection failure or a non-success status.
    pub(crate) async fn open(url: String, params: &HttpParams) -> Result<Self> {
        if params.kerberos && params.client.is_none() {
            return Err(Error::transport(
                BACKEND,
                "kerberos negotiation requires an injected pre-authenticated client",
            ));
        }
        let client = params.client.clone().unwrap_or_default();

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        for (name, value) in &params.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::transport_with_source(BACKEND, "invalid header name", e))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::transport_with_source(BACKEND, "invalid header value", e))?;
            headers.insert(name, value);
        }
        let auth = params
            .user
            .clone()
            .map(|user| (user, params.password.clone()));

        let mut reader = Self {
            client,
            url,
            headers,
            auth,
            content_length: None,
            position: 0,
            buffer: ByteBuffer::new(),
            body: None,
            skip_remaining: 0,
            exhausted: false,
            buffer_size: params.buffer_size,
        };
        reader.request(None).await?;
        Ok(reader)
    }

    /// Issues a GET, optionally ranged, and installs the response body.
    async fn request(&mut self, range_start: Option<u64>) -> Result<()> {
        let mut request = self.client.get(&self.url).headers(self.headers.clone());
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, password.as_deref());
        }
        if let Some(start) = range_start {
            request = request.header(RANGE, format!("bytes={start}-"));
        }

        let response = request.send().await.map_err(|e| {
            Error::transport_with_source(BACKEND, format!("GET {} failed", self.url), e)
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(
                BACKEND,
                format!("GET {} returned {status}", self.url),
            ));
        }

        // The initial response carries the object length; a 206 carries the
        // remainder length, which we ignore in favor of the first answer.
        if self.content_length.is_none() && status != StatusCode::PARTIAL_CONTENT {
            self.content_length = response.content_length();
        }

        self.skip_remaining = match range_start {
            // Server ignored the Range header: discard up to the offset.
            Some(start) if status != StatusCode::PARTIAL_CONTENT => {
                tracing::debug!(url = %self.url, start, "server lacks range support, discarding");
                start
            }
            _ => 0,
        };

        let stream = response
            .bytes_stream()
            .map_err(|e| Error::transport_with_source(BACKEND, "response body read failed", e));
        self.body = Some(Box::pin(stream));
        self.exhausted = false;
        Ok(())
    }

    /// The offset the next read will observe.
    pub fn tell(&self) -> u64 {
        self.position - self.buffer.len() as u64
    }

    async fn fill(&mut self) -> Result<bool> {
        if self.body.is_none() {
            if self.exhausted {
                return Ok(false);
            }
            if let Some(total) = self.content_length {
                if self.position >= total {
                    self.exhausted = true;
                    return Ok(false);
                }
            }
            self.request(Some(self.position)).await?;
        }
        let body = match self.body.as_mut() {
            Some(b) => b,
            None => return Ok(false),
        };
        match body.next().await {
            Some(Ok(chunk)) => {
                let (skip, served) = split_skip(chunk, self.skip_remaining);
                self.skip_remaining = skip;
                if !served.is_empty() {
                    self.position += served.len() as u64;
                    self.buffer.write_bytes(served);
                }
                Ok(true)
            }
            Some(Err(e)) => {
                self.body = None;
                Err(e)
            }
            None => {
                self.body = None;
                self.exhausted = true;
                Ok(false)
            }
        }
    }
}

/// Drops up to `skip` bytes from the front of `chunk`; returns the skip
/// still owed and the bytes to serve.
fn split_skip(chunk: Bytes, skip: u64) -> (u64, Bytes) {
    if skip == 0 {
        return (0, chunk);
    }
    if (chunk.len() as u64) <= skip {
        (skip - chunk.len() as u64, Bytes::new())
    } else {
        (0, chunk.slice(skip as usize..))
    }
}

#[async_trait]
impl TransportReader for HttpReader {
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
            SeekFrom::Current(offset) => self.tell() as i64 + offset,
            SeekFrom::End(offset) => match self.content_length {
                Some(total) => total as i64 + offset,
                None => {
                    return Err(Error::io(
                        "seek from end requires a known content length",
                    ))
                }
            },
        };
        if target < 0 {
            return Err(Error::io("seek to negative position"));
        }
        let mut target = target as u64;
        if let Some(total) = self.content_length {
            target = target.min(total);
        }

        if target == self.tell() {
            return Ok(target);
        }

        self.buffer.clear();
        self.body = None;
        self.exhausted = false;
        self.skip_remaining = 0;
        self.position = target;
        Ok(target)
    }

    fn seekable(&self) -> bool {
        true
    }
}
