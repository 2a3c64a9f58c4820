// src/params.rs

//! Transport parameters.
//!
//! Typed, per-backend knobs passed to [`crate::open_with`]. Every section
//! has serviceable defaults; values can also be loaded from a TOML file and
//! overridden from `UNISTREAM_`-prefixed environment variables. Injected
//! client objects (an `aws_sdk_s3::Client`, a pre-authenticated
//! `reqwest::Client`) ride along outside the serialized representation.
//!
//! Parameters addressed to a backend other than the one a URI selects are
//! ignored with a WARN record.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Default part size for multi-request uploads (S3, GCS, WebHDFS).
pub const DEFAULT_MIN_PART_SIZE: usize = 50 * 1024 * 1024;
/// Service minimum for a non-final S3 part.
pub const S3_MIN_PART_SIZE: usize = 5 * 1024 * 1024;
/// Service maximum for a single S3 part or single-shot PUT.
pub const S3_MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;
/// Service maximum number of parts in one S3 multipart upload.
pub const S3_MAX_PART_COUNT: i32 = 10_000;
/// GCS resumable uploads require non-final chunks on this alignment.
pub const GCS_CHUNK_ALIGNMENT: usize = 256 * 1024;

/// All transport parameters, one section per backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportParams {
    pub local: LocalParams,
    pub s3: S3Params,
    pub http: HttpParams,
    pub webhdfs: WebHdfsParams,
    pub gcs: GcsParams,
    pub ssh: SshParams,
}

/// Local filesystem options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalParams {
    /// Buffer size in bytes for file I/O.
    pub buffer_size: usize,
    /// Whether to memory-map large files on the read path.
    pub use_mmap: bool,
    /// File size threshold (bytes) above which to use mmap.
    pub mmap_threshold: u64,
}

impl Default for LocalParams {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            use_mmap: false,
            mmap_threshold: 1024 * 1024,
        }
    }
}

/// S3 options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Params {
    /// Injected session client; when present it is used as-is unless the
    /// URI itself carries credentials or an endpoint.
    #[serde(skip)]
    #[cfg(feature = "s3")]
    pub client: Option<aws_sdk_s3::Client>,
    /// AWS region (defaults to the environment's resolution).
    pub region: Option<String>,
    /// Custom endpoint URL (MinIO, LocalStack, ...).
    pub endpoint: Option<String>,
    /// Allow plain-HTTP endpoints built from URI authority components.
    pub allow_http: bool,
    /// Path-style addressing (required by MinIO).
    pub force_path_style: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// Read chunk size in bytes.
    pub buffer_size: usize,
    /// Part size for multipart uploads; the final part may be smaller.
    pub min_part_size: usize,
    /// Whether writes use the multipart protocol.
    pub multipart_upload: bool,
    /// Object version to read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

impl Default for S3Params {
    fn default() -> Self {
        Self {
            #[cfg(feature = "s3")]
            client: None,
            region: None,
            endpoint: None,
            allow_http: false,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            buffer_size: crate::transport::DEFAULT_BUFFER_SIZE,
            min_part_size: DEFAULT_MIN_PART_SIZE,
            multipart_upload: true,
            version_id: None,
        }
    }
}

/// HTTP(S) options (read-only backend).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpParams {
    /// Injected client; required for negotiated auth schemes (kerberos),
    /// where the caller supplies a client that already holds the
    /// credentials.
    #[serde(skip)]
    #[cfg(any(feature = "http", feature = "webhdfs", feature = "gcs"))]
    pub client: Option<reqwest::Client>,
    /// HTTP basic auth user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// HTTP basic auth password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Kerberos/SPNEGO negotiation; satisfied through the injected client.
    pub kerberos: bool,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Read chunk size in bytes.
    pub buffer_size: usize,
}

impl Default for HttpParams {
    fn default() -> Self {
        Self {
            #[cfg(any(feature = "http", feature = "webhdfs", feature = "gcs"))]
            client: None,
            user: None,
            password: None,
            kerberos: false,
            headers: Vec::new(),
            buffer_size: crate::transport::DEFAULT_BUFFER_SIZE,
        }
    }
}

/// WebHDFS options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebHdfsParams {
    /// Part size for chunked PUT uploads.
    pub min_part_size: usize,
    /// Value for the `user.name` query parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl Default for WebHdfsParams {
    fn default() -> Self {
        Self {
            min_part_size: DEFAULT_MIN_PART_SIZE,
            user: None,
        }
    }
}

/// Google Cloud Storage options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcsParams {
    /// OAuth2 bearer token; alternatively inject a pre-authenticated
    /// client through [`HttpParams::client`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// API endpoint override (testing against fake-gcs-server).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Upload chunk size; non-final chunks are aligned down to 256 KiB.
    pub min_part_size: usize,
    /// Read chunk size in bytes.
    pub buffer_size: usize,
}

impl Default for GcsParams {
    fn default() -> Self {
        Self {
            token: None,
            endpoint: None,
            min_part_size: DEFAULT_MIN_PART_SIZE,
            buffer_size: crate::transport::DEFAULT_BUFFER_SIZE,
        }
    }
}

/// SSH/SFTP options; URI components win over these on collision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Private key file for public-key auth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,
    /// TCP connect timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
}

impl Default for SshParams {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            port: None,
            private_key: None,
            connect_timeout_secs: None,
        }
    }
}

impl FromStr for TransportParams {
    type Err = Error;

    /// Parses parameters from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::io(format!("failed to parse TOML params: {e}")))
    }
}

impl TransportParams {
    /// Loads parameters from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a value
    /// is outside the service limits.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::io_with_source(format!("failed to read {}", path.display()), e)
        })?;
        let params: Self = content.parse()?;
        params.validate()?;
        Ok(params)
    }

    /// Applies `UNISTREAM_`-prefixed environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        fn parse_env<T: FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }

        if let Some(v) = parse_env("UNISTREAM_S3_MIN_PART_SIZE") {
            self.s3.min_part_size = v;
        }
        if let Some(v) = parse_env("UNISTREAM_S3_MULTIPART_UPLOAD") {
            self.s3.multipart_upload = v;
        }
        if let Ok(v) = std::env::var("UNISTREAM_S3_REGION") {
            self.s3.region = Some(v);
        }
        if let Ok(v) = std::env::var("UNISTREAM_S3_ENDPOINT") {
            self.s3.endpoint = Some(v);
        }
        if let Some(v) = parse_env("UNISTREAM_S3_BUFFER_SIZE") {
            self.s3.buffer_size = v;
        }
        if let Some(v) = parse_env("UNISTREAM_WEBHDFS_MIN_PART_SIZE") {
            self.webhdfs.min_part_size = v;
        }
        if let Some(v) = parse_env("UNISTREAM_GCS_MIN_PART_SIZE") {
            self.gcs.min_part_size = v;
        }
        if let Some(v) = parse_env("UNISTREAM_LOCAL_BUFFER_SIZE") {
            self.local.buffer_size = v;
        }
        self
    }

    /// Checks all values against the service limits.
    ///
    /// # Errors
    ///
    /// Returns `LimitExceeded` for part sizes outside the services' bounds
    /// and `Io` for nonsensical buffer sizes.
    pub fn validate(&self) -> Result<()> {
        if self.local.buffer_size == 0
            || self.s3.buffer_size == 0
            || self.http.buffer_size == 0
            || self.gcs.buffer_size == 0
        {
            return Err(Error::io("buffer_size must be greater than 0"));
        }
        if self.s3.min_part_size < S3_MIN_PART_SIZE {
            return Err(Error::limit_exceeded(
                "s3.min_part_size below the 5 MiB service minimum",
            ));
        }
        if self.s3.min_part_size as u64 > S3_MAX_PART_SIZE {
            return Err(Error::limit_exceeded(
                "s3.min_part_size above the 5 GiB service maximum",
            ));
        }
        if self.webhdfs.min_part_size == 0 {
            return Err(Error::io("webhdfs.min_part_size must be greater than 0"));
        }
        if self.gcs.min_part_size < GCS_CHUNK_ALIGNMENT {
            return Err(Error::limit_exceeded(
                "gcs.min_part_size below the 256 KiB chunk alignment",
            ));
        }
        Ok(())
    }

    /// Logs a WARN for every customized section that the selected backend
    /// will not read.
    pub(crate) fn warn_unused(&self, backend: &'static str) {
        for (section, customized) in [
            ("local", self.local_customized()),
            ("s3", self.s3_customized()),
            ("http", self.http_customized()),
            ("webhdfs", self.webhdfs_customized()),
            ("gcs", self.gcs_customized()),
            ("ssh", self.ssh_customized()),
        ] {
            // The HTTP section doubles as the client carrier for the other
            // reqwest-based backends.
            let applies = section == backend
                || (section == "http" && matches!(backend, "webhdfs" | "gcs"));
            if customized && !applies {
                tracing::warn!(
                    backend,
                    section,
                    "transport params for a different backend are ignored"
                );
            }
        }
    }

    fn local_customized(&self) -> bool {
        let d = LocalParams::default();
        let p = &self.local;
        p.buffer_size != d.buffer_size
            || p.use_mmap != d.use_mmap
            || p.mmap_threshold != d.mmap_threshold
    }

    fn s3_customized(&self) -> bool {
        let d = S3Params::default();
        let p = &self.s3;
        #[cfg(feature = "s3")]
        if p.client.is_some() {
            return true;
        }
        p.region != d.region
            || p.endpoint != d.endpoint
            || p.allow_http != d.allow_http
            || p.force_path_style != d.force_path_style
            || p.access_key_id != d.access_key_id
            || p.secret_access_key != d.secret_access_key
            || p.session_token != d.session_token
            || p.buffer_size != d.buffer_size
            || p.min_part_size != d.min_part_size
            || p.multipart_upload != d.multipart_upload
            || p.version_id != d.version_id
    }

    fn http_customized(&self) -> bool {
        let d = HttpParams::default();
        let p = &self.http;
        #[cfg(any(feature = "http", feature = "webhdfs", feature = "gcs"))]
        if p.client.is_some() {
            return true;
        }
        p.user != d.user
            || p.password != d.password
            || p.kerberos != d.kerberos
            || p.headers != d.headers
            || p.buffer_size != d.buffer_size
    }

    fn webhdfs_customized(&self) -> bool {
        let d = WebHdfsParams::default();
        let p = &self.webhdfs;
        p.min_part_size != d.min_part_size || p.user != d.user
    }

    fn gcs_customized(&self) -> bool {
        let d = GcsParams::default();
        let p = &self.gcs;
        p.token != d.token
            || p.endpoint != d.endpoint
            || p.min_part_size != d.min_part_size
            || p.buffer_size != d.buffer_size
    }

    fn ssh_customized(&self) -> bool {
        let d = SshParams::default();
        let p = &self.ssh;
        p.user != d.user
            || p.password != d.password
            || p.port != d.port
            || p.private_key != d.private_key
            || p.connect_timeout_secs != d.connect_timeout_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let params = TransportParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.s3.min_part_size, DEFAULT_MIN_PART_SIZE);
        assert!(params.s3.multipart_upload);
        assert_eq!(params.webhdfs.min_part_size, DEFAULT_MIN_PART_SIZE);
    }

    #[test]
    fn test_from_str_partial() {
        let toml = r#"
            [s3]
            min_part_size = 8388608
            multipart_upload = false

            [webhdfs]
            min_part_size = 1048576
        "#;
        let params: TransportParams = toml.parse().unwrap();
        assert_eq!(params.s3.min_part_size, 8 * 1024 * 1024);
        assert!(!params.s3.multipart_upload);
        assert_eq!(params.webhdfs.min_part_size, 1024 * 1024);
        // Untouched sections keep defaults.
        assert_eq!(params.local.buffer_size, 64 * 1024);
    }

    #[test]
    fn test_from_str_invalid_toml() {
        let result: std::result::Result<TransportParams, _> = "broken = [".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_small_s3_part() {
        let mut params = TransportParams::default();
        params.s3.min_part_size = 1024;
        match params.validate() {
            Err(Error::LimitExceeded { .. }) => {}
            other => panic!("expected LimitExceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_small_gcs_part() {
        let mut params = TransportParams::default();
        params.gcs.min_part_size = 1024;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let mut params = TransportParams::default();
        params.http.buffer_size = 0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("UNISTREAM_S3_MIN_PART_SIZE", "5242880");
        std::env::set_var("UNISTREAM_S3_MULTIPART_UPLOAD", "false");
        let params = TransportParams::default().with_env_overrides();
        assert_eq!(params.s3.min_part_size, 5 * 1024 * 1024);
        assert!(!params.s3.multipart_upload);
        std::env::remove_var("UNISTREAM_S3_MIN_PART_SIZE");
        std::env::remove_var("UNISTREAM_S3_MULTIPART_UPLOAD");
    }

    #[test]
    fn test_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gcs]\nmin_part_size = 524288").unwrap();
        let params = TransportParams::from_file(file.path()).unwrap();
        assert_eq!(params.gcs.min_part_size, 512 * 1024);
    }

    #[test]
    fn test_customized_detection() {
        let mut params = TransportParams::default();
        assert!(!params.s3_customized());
        params.s3.version_id = Some("v1".to_string());
        assert!(params.s3_customized());
        assert!(!params.ssh_customized());
    }
}
