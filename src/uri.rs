// src/uri.rs

//! Location parsing.
//!
//! Turns a location string into a [`Location`] value identifying the backend
//! and its addressing components. Anything without a recognizable
//! `scheme://` prefix is a local path; `~` is expanded against the user's
//! home directory.
//!
//! The S3 authority accepts up to two `@` separators:
//!
//! ```text
//! s3://bucket/key
//! s3://access:secret@bucket/key
//! s3://access:secret@host:port@bucket/key
//! ```
//!
//! For SSH, the path portion begins at the first `/` after the host; a
//! doubled slash (`//path`) denotes an absolute remote path while a single
//! slash denotes a path relative to the user's home directory.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Default WebHDFS namenode port.
pub const DEFAULT_WEBHDFS_PORT: u16 = 50070;
/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// A parsed location, one variant per backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local {
        path: PathBuf,
    },
    Http {
        url: String,
    },
    Ssh {
        user: Option<String>,
        password: Option<String>,
        host: String,
        port: Option<u16>,
        path: String,
    },
    S3 {
        bucket: String,
        key: String,
        access_key: Option<String>,
        secret_key: Option<String>,
        endpoint_host: Option<String>,
        endpoint_port: Option<u16>,
        version_id: Option<String>,
    },
    Gcs {
        bucket: String,
        blob: String,
    },
    Hdfs {
        path: String,
    },
    WebHdfs {
        host: String,
        port: u16,
        path: String,
    },
}

impl Location {
    /// Backend identifier used in error messages and logs.
    pub fn backend(&self) -> &'static str {
        match self {
            Location::Local { .. } => "local",
            Location::Http { .. } => "http",
            Location::Ssh { .. } => "ssh",
            Location::S3 { .. } => "s3",
            Location::Gcs { .. } => "gcs",
            Location::Hdfs { .. } => "hdfs",
            Location::WebHdfs { .. } => "webhdfs",
        }
    }

    /// The path-like component used for extension-based codec selection.
    ///
    /// Returns `None` when the location has no meaningful path (for example
    /// an S3 location with an empty key).
    pub fn key_path(&self) -> Option<&str> {
        match self {
            Location::Local { path } => path.to_str(),
            Location::Http { url } => {
                // Everything before '?' / '#'; the query string is not part
                // of the object name.
                let end = url.find(['?', '#']).unwrap_or(url.len());
                Some(&url[..end])
            }
            Location::Ssh { path, .. } => Some(path),
            Location::S3 { key, .. } => (!key.is_empty()).then_some(key.as_str()),
            Location::Gcs { blob, .. } => (!blob.is_empty()).then_some(blob.as_str()),
            Location::Hdfs { path } => Some(path),
            Location::WebHdfs { path, .. } => Some(path),
        }
    }
}

/// Parses a location string into a [`Location`].
///
/// # Errors
///
/// Returns `MalformedUri` when a recognized scheme's required fields cannot
/// be extracted, and `UnsupportedScheme` for a syntactically valid scheme
/// with no corresponding backend.
pub fn parse_uri(uri: &str) -> Result<Location> {
    let trimmed = uri.trim_start();

    if trimmed.starts_with('~') {
        return Ok(Location::Local {
            path: expand_home(trimmed),
        });
    }

    let (scheme, rest) = match split_scheme(trimmed) {
        Some(pair) => pair,
        None => {
            return Ok(Location::Local {
                path: PathBuf::from(trimmed),
            })
        }
    };

    match scheme.to_ascii_lowercase().as_str() {
        "file" => Ok(Location::Local {
            path: PathBuf::from(rest),
        }),
        "http" | "https" => Ok(Location::Http {
            url: trimmed.to_string(),
        }),
        "s3" | "s3a" | "s3n" | "s3u" => parse_s3(trimmed, rest),
        "gs" => parse_gcs(trimmed, rest),
        "hdfs" => {
            if rest.is_empty() {
                return Err(Error::malformed_uri(uri, "empty HDFS path"));
            }
            Ok(Location::Hdfs {
                path: rest.to_string(),
            })
        }
        "webhdfs" => parse_webhdfs(trimmed, rest),
        "ssh" | "scp" | "sftp" => parse_ssh(trimmed, rest),
        other => Err(Error::unsupported_scheme(other)),
    }
}

/// Splits `scheme://rest`, validating the scheme as
/// `[a-zA-Z][a-zA-Z0-9+.-]*`. Returns `None` when the input has no such
/// prefix.
fn split_scheme(input: &str) -> Option<(&str, &str)> {
    let idx = input.find("://")?;
    let scheme = &input[..idx];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-')) {
        return None;
    }
    Some((scheme, &input[idx + 3..]))
}

fn expand_home(path: &str) -> PathBuf {
    debug_assert!(path.starts_with('~'));
    if path == "~" {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home);
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    // Unknown user form (`~other`) or no HOME: leave the path untouched.
    PathBuf::from(path)
}

fn parse_s3(uri: &str, rest: &str) -> Result<Location> {
    let segments: Vec<&str> = rest.split('@').collect();

    let (access_key, secret_key, endpoint_host, endpoint_port, bucket_and_key) =
        match segments.len() {
            1 => (None, None, None, None, segments[0]),
            2 => {
                let (access, secret) = split_credentials(uri, segments[0])?;
                (Some(access), Some(secret), None, None, segments[1])
            }
            3 => {
                let (access, secret) = split_credentials(uri, segments[0])?;
                let (host, port) = split_host_port(uri, segments[1])?;
                (Some(access), Some(secret), Some(host), port, segments[2])
            }
            _ => {
                return Err(Error::malformed_uri(
                    uri,
                    "at most two '@' separators are allowed in an S3 URI",
                ))
            }
        };

    let (bucket, key) = match bucket_and_key.split_once('/') {
        Some((b, k)) => (b, k),
        None => (bucket_and_key, ""),
    };
    if bucket.is_empty() {
        return Err(Error::malformed_uri(uri, "missing bucket name"));
    }

    Ok(Location::S3 {
        bucket: bucket.to_string(),
        key: key.to_string(),
        access_key,
        secret_key,
        endpoint_host,
        endpoint_port,
        version_id: None,
    })
}

fn split_credentials(uri: &str, part: &str) -> Result<(String, String)> {
    match part.split_once(':') {
        Some((access, secret)) if !access.is_empty() && !secret.is_empty() => {
            Ok((access.to_string(), secret.to_string()))
        }
        _ => Err(Error::malformed_uri(
            uri,
            "credentials must be of the form 'access:secret'",
        )),
    }
}

fn split_host_port(uri: &str, part: &str) -> Result<(String, Option<u16>)> {
    match part.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(Error::malformed_uri(uri, "empty endpoint host"));
            }
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::malformed_uri(uri, format!("invalid port '{port}'")))?;
            Ok((host.to_string(), Some(port)))
        }
        None => {
            if part.is_empty() {
                return Err(Error::malformed_uri(uri, "empty endpoint host"));
            }
            Ok((part.to_string(), None))
        }
    }
}

fn parse_gcs(uri: &str, rest: &str) -> Result<Location> {
    let (bucket, blob) = match rest.split_once('/') {
        Some((b, k)) => (b, k),
        None => (rest, ""),
    };
    if bucket.is_empty() {
        return Err(Error::malformed_uri(uri, "missing bucket name"));
    }
    Ok(Location::Gcs {
        bucket: bucket.to_string(),
        blob: blob.to_string(),
    })
}

fn parse_webhdfs(uri: &str, rest: &str) -> Result<Location> {
    let (authority, path) = match rest.split_once('/') {
        Some((a, p)) => (a, format!("/{p}")),
        None => return Err(Error::malformed_uri(uri, "missing WebHDFS path")),
    };
    let (host, port) = split_host_port(uri, authority)?;
    Ok(Location::WebHdfs {
        host,
        port: port.unwrap_or(DEFAULT_WEBHDFS_PORT),
        path,
    })
}

fn parse_ssh(uri: &str, rest: &str) -> Result<Location> {
    let (userinfo, after_user) = match rest.split_once('@') {
        Some((u, r)) => (Some(u), r),
        None => (None, rest),
    };

    let (user, password) = match userinfo {
        Some(info) => match info.split_once(':') {
            Some((u, p)) => (Some(u.to_string()), Some(p.to_string())),
            None => (Some(info.to_string()), None),
        },
        None => (None, None),
    };

    let (authority, path) = match after_user.split_once('/') {
        // A second leading slash marks an absolute remote path; a single
        // slash is relative to the login user's home directory.
        Some((a, p)) => (a, p.to_string()),
        None => return Err(Error::malformed_uri(uri, "missing remote path")),
    };
    if path.is_empty() {
        return Err(Error::malformed_uri(uri, "missing remote path"));
    }

    if authority.is_empty() {
        return Err(Error::malformed_uri(uri, "missing host"));
    }
    let (host, port) = split_host_port(uri, authority)?;

    Ok(Location::Ssh {
        user,
        password,
        host,
        port,
        path,
    })
}
