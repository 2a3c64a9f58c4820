// src/transport/s3/mod.rs

//! S3 streaming engine.
//!
//! Three pieces: seekable ranged reads (the shared
//! [`RangedReader`](crate::transport::ranged::RangedReader) over
//! [`SdkApi`]), the multipart-upload [`writer`], and the parallel
//! [`bucket`] download pipeline. All of them talk to the service through
//! narrow seams (`RangedFetch`, `S3Api`, `BucketApi`) so the protocol
//! logic is testable without a network.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::params::S3Params;
use crate::transport::ranged::RangedFetch;
use crate::transport::BodyStream;

pub mod bucket;
pub mod writer;

pub(crate) const BACKEND: &str = "s3";

/// One completed slice of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPart {
    /// 1-based, contiguous in insertion order.
    pub part_number: i32,
    /// Non-empty service-assigned entity tag.
    pub etag: String,
}

/// Upload-side S3 operations used by the writer.
///
/// Reads go through [`RangedFetch`]; [`SdkApi`] implements both.
#[async_trait]
pub(crate) trait S3Api: Send + Sync {
    /// Single-shot PUT of the whole object.
    async fn put_object(&self, data: Bytes) -> Result<()>;

    async fn create_multipart_upload(&self) -> Result<String>;

    /// Uploads one part, returning its etag.
    async fn upload_part(&self, upload_id: &str, part_number: i32, data: Bytes) -> Result<String>;

    async fn complete_multipart_upload(&self, upload_id: &str, parts: &[UploadPart])
        -> Result<()>;

    async fn abort_multipart_upload(&self, upload_id: &str) -> Result<()>;
}

/// Production [`S3Api`] over the AWS SDK client.
pub(crate) struct SdkApi {
    client: aws_sdk_s3::Client,
    bucket: String,
    key: String,
    version_id: Option<String>,
}

impl SdkApi {
    pub(crate) fn new(
        client: aws_sdk_s3::Client,
        bucket: String,
        key: String,
        version_id: Option<String>,
    ) -> Self {
        Self {
            client,
            bucket,
            key,
            version_id,
        }
    }
}

#[async_trait]
impl RangedFetch for SdkApi {
    async fn content_length(&self) -> Result<u64> {
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .set_version_id(self.version_id.clone())
            .send()
            .await
            .map_err(|e| {
                Error::transport_with_source(
                    BACKEND,
                    format!("HEAD s3://{}/{} failed", self.bucket, self.key),
                    e,
                )
            })?;
        Ok(resp.content_length().unwrap_or_default().max(0) as u64)
    }

    async fn get_range(&self, start: u64, end: u64) -> Result<BodyStream> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .set_version_id(self.version_id.clone())
            .range(format!("bytes={start}-{end}"))
            .send()
            .await
            .map_err(|e| {
                Error::transport_with_source(
                    BACKEND,
                    format!("GET s3://{}/{} range {start}-{end} failed", self.bucket, self.key),
                    e,
                )
            })?;

        let stream = futures::stream::try_unfold(resp.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Ok(Some((chunk, body))),
                Ok(None) => Ok(None),
                Err(e) => Err(Error::transport_with_source(
                    BACKEND,
                    "response body read failed",
                    e,
                )),
            }
        });
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl S3Api for SdkApi {
    async fn put_object(&self, data: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .body(aws_sdk_s3::primitives::ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                Error::transport_with_source(
                    BACKEND,
                    format!("PUT s3://{}/{} failed", self.bucket, self.key),
                    e,
                )
            })?;
        Ok(())
    }

    async fn create_multipart_upload(&self) -> Result<String> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| {
                Error::transport_with_source(
                    BACKEND,
                    format!(
                        "CreateMultipartUpload s3://{}/{} failed",
                        self.bucket, self.key
                    ),
                    e,
                )
            })?;
        resp.upload_id()
            .map(str::to_string)
            .ok_or_else(|| Error::transport(BACKEND, "service returned no upload id"))
    }

    async fn upload_part(&self, upload_id: &str, part_number: i32, data: Bytes) -> Result<String> {
        let resp = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(aws_sdk_s3::primitives::ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                Error::transport_with_source(
                    BACKEND,
                    format!("UploadPart {part_number} for s3://{}/{} failed", self.bucket, self.key),
                    e,
                )
            })?;
        resp.e_tag()
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::transport(BACKEND, "service returned no etag for part"))
    }

    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        parts: &[UploadPart],
    ) -> Result<()> {
        let completed = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|p| {
                        aws_sdk_s3::types::CompletedPart::builder()
                            .part_number(p.part_number)
                            .e_tag(&p.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| {
                Error::transport_with_source(
                    BACKEND,
                    format!(
                        "CompleteMultipartUpload s3://{}/{} failed",
                        self.bucket, self.key
                    ),
                    e,
                )
            })?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| {
                Error::transport_with_source(
                    BACKEND,
                    format!(
                        "AbortMultipartUpload s3://{}/{} failed",
                        self.bucket, self.key
                    ),
                    e,
                )
            })?;
        Ok(())
    }
}

/// Builds (or reuses) an S3 client for a parsed location.
///
/// An injected `params.client` is used as-is unless the URI itself carries
/// credentials or an endpoint; those are built in and win, with the
/// collision logged.
pub(crate) async fn build_client(
    access_key: Option<&str>,
    secret_key: Option<&str>,
    endpoint_host: Option<&str>,
    endpoint_port: Option<u16>,
    params: &S3Params,
) -> Result<aws_sdk_s3::Client> {
    let uri_overrides = access_key.is_some() || endpoint_host.is_some();

    if let Some(client) = &params.client {
        if !uri_overrides {
            return Ok(client.clone());
        }
        tracing::warn!(
            "URI carries credentials or an endpoint; the injected S3 client is ignored"
        );
    }

    let base = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let mut builder = aws_sdk_s3::config::Builder::from(&base);

    if let Some(region) = &params.region {
        builder = builder.region(aws_sdk_s3::config::Region::new(region.clone()));
    }

    // Endpoint: the URI authority wins over the parameter.
    let endpoint = match endpoint_host {
        Some(host) => {
            if params.endpoint.is_some() {
                tracing::warn!("URI endpoint overrides s3.endpoint parameter");
            }
            let scheme = if params.allow_http { "http" } else { "https" };
            Some(match endpoint_port {
                Some(port) => format!("{scheme}://{host}:{port}"),
                None => format!("{scheme}://{host}"),
            })
        }
        None => params.endpoint.clone(),
    };
    let has_endpoint = endpoint.is_some();
    if let Some(url) = endpoint {
        builder = builder.endpoint_url(url);
    }

    // Credentials: the URI authority wins over the parameters.
    let creds = match (access_key, secret_key) {
        (Some(access), Some(secret)) => {
            if params.access_key_id.is_some() {
                tracing::warn!("URI credentials override s3.access_key_id parameter");
            }
            Some((access.to_string(), secret.to_string(), None))
        }
        _ => params
            .access_key_id
            .clone()
            .zip(params.secret_access_key.clone())
            .map(|(a, s)| (a, s, params.session_token.clone())),
    };
    if let Some((access, secret, token)) = creds {
        builder = builder.credentials_provider(aws_sdk_s3::config::Credentials::new(
            access, secret, token, None, "unistream",
        ));
    }

    // Custom endpoints are virtually always MinIO-style path-addressed.
    if params.force_path_style || has_endpoint {
        builder = builder.force_path_style(true);
    }

    Ok(aws_sdk_s3::Client::from_conf(builder.build()))
}
