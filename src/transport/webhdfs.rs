// src/transport/webhdfs.rs

//! WebHDFS backend.
//!
//! Reads issue `op=OPEN` and follow the namenode's redirect to the datanode.
//! Writes use the two-step protocol explicitly: the first buffered part goes
//! out as `op=CREATE` (PUT), subsequent parts as `op=APPEND` (POST); each
//! step captures the 307 redirect manually and sends the data to the
//! returned datanode URL. Parts are `min_part_size` bytes; the final flush
//! on `finish` creates the file even when nothing was written.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Method, StatusCode};

use super::{BodyStream, TransportReader, TransportWriter};
use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::params::WebHdfsParams;

pub(crate) const BACKEND: &str = "webhdfs";

fn api_url(host: &str, port: u16, path: &str) -> String {
    format!("http://{host}:{port}/webhdfs/v1{path}")
}

fn with_query(base: &str, op: &str, user: Option<&str>, extra: &[(&str, &str)]) -> String {
    let mut url = format!("{base}?op={op}");
    if let Some(user) = user {
        url.push_str(&format!("&user.name={user}"));
    }
    for (k, v) in extra {
        url.push_str(&format!("&{k}={v}"));
    }
    url
}

pub struct WebHdfsReader {
    body: Option<BodyStream>,
    buffer: ByteBuffer,
}

impl WebHdfsReader {
    /// Opens the file with a redirect-following `op=OPEN` GET.
    ///
    /// # Errors
    ///
    /// Returns `Transport` on connection failure or a non-success status.
    pub(crate) async fn open(
        host: &str,
        port: u16,
        path: &str,
        params: &WebHdfsParams,
    ) -> Result<Self> {
        let client = reqwest::Client::new();
        let url = with_query(&api_url(host, port, path), "OPEN", params.user.as_deref(), &[]);

        let response = client.get(&url).send().await.map_err(|e| {
            Error::transport_with_source(BACKEND, format!("GET {url} failed"), e)
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(
                BACKEND,
                format!("GET {url} returned {status}"),
            ));
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| Error::transport_with_source(BACKEND, "response body read failed", e));
        Ok(Self {
            body: Some(Box::pin(stream)),
            buffer: ByteBuffer::new(),
        })
    }
}

#[async_trait]
impl TransportReader for WebHdfsReader {
    async fn read(&mut self, len: usize) -> Result<Bytes> {
        while self.buffer.len() < len {
            let chunk = match self.body.as_mut() {
                Some(body) => body.next().await,
                None => None,
            };
            match chunk {
                Some(Ok(chunk)) => self.buffer.write_bytes(chunk),
                Some(Err(e)) => {
                    self.body = None;
                    return Err(e);
                }
                None => {
                    self.body = None;
                    break;
                }
            }
        }
        Ok(self.buffer.read(len))
    }
}

pub struct WebHdfsWriter {
    /// Redirects are handled manually, so this client must not follow them.
    client: reqwest::Client,
    base_url: String,
    user: Option<String>,
    min_part_size: usize,
    buffer: ByteBuffer,
    created: bool,
    written: u64,
}

impl WebHdfsWriter {
    pub(crate) fn new(host: &str, port: u16, path: &str, params: &WebHdfsParams) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::transport_with_source(BACKEND, "failed to build client", e))?;
        Ok(Self {
            client,
            base_url: api_url(host, port, path),
            user: params.user.clone(),
            min_part_size: params.min_part_size,
            buffer: ByteBuffer::new(),
            created: false,
            written: 0,
        })
    }

    /// Runs one two-step namenode/datanode exchange with `data` as body.
    async fn two_step(&self, method: Method, url: String, data: Bytes) -> Result<()> {
        let response = self
            .client
            .request(method.clone(), &url)
            .send()
            .await
            .map_err(|e| Error::transport_with_source(BACKEND, format!("{url} failed"), e))?;
        if response.status() != StatusCode::TEMPORARY_REDIRECT {
            return Err(Error::transport(
                BACKEND,
                format!("{url} returned {} instead of a redirect", response.status()),
            ));
        }
        let datanode = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::transport(BACKEND, "redirect without Location header"))?;

        let response = self
            .client
            .request(method, &datanode)
            .body(data)
            .send()
            .await
            .map_err(|e| {
                Error::transport_with_source(BACKEND, "datanode request failed", e)
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(
                BACKEND,
                format!("datanode returned {status}"),
            ));
        }
        Ok(())
    }

    async fn flush_part(&mut self, size: usize) -> Result<()> {
        let data = self.buffer.read(size);
        if !self.created {
            let url = with_query(
                &self.base_url,
                "CREATE",
                self.user.as_deref(),
                &[("overwrite", "true")],
            );
            self.two_step(Method::PUT, url, data).await?;
            self.created = true;
        } else {
            let url = with_query(&self.base_url, "APPEND", self.user.as_deref(), &[]);
            self.two_step(Method::POST, url, data).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TransportWriter for WebHdfsWriter {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.write(data);
        self.written += data.len() as u64;
        while self.buffer.len() >= self.min_part_size {
            let size = self.min_part_size;
            self.flush_part(size).await?;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        // An empty stream still creates the file.
        if !self.buffer.is_empty() || !self.created {
            let size = self.buffer.len();
            self.flush_part(size).await?;
        }
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }
}
