// src/error.rs

use thiserror::Error;

/// Errors produced by the streaming I/O layer.
#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed URI '{uri}': {message}")]
    MalformedUri { uri: String, message: String },

    #[error("scheme '{scheme}' is recognized but its backend is not compiled in")]
    UnsupportedScheme { scheme: String },

    #[error("{backend} transport error: {message}")]
    Transport {
        backend: &'static str,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("invalid mode '{mode}': {message}")]
    InvalidMode { mode: String, message: String },

    #[error("limit exceeded: {message}")]
    LimitExceeded { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

// Convenience constructors
impl Error {
    pub fn malformed_uri(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedUri {
            uri: uri.into(),
            message: message.into(),
        }
    }

    pub fn unsupported_scheme(scheme: impl Into<String>) -> Self {
        Self::UnsupportedScheme {
            scheme: scheme.into(),
        }
    }

    pub fn transport(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            backend,
            message: message.into(),
            source: None,
        }
    }

    pub fn transport_with_source(
        backend: &'static str,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            backend,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
            source: None,
        }
    }

    pub fn io_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn invalid_mode(mode: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidMode {
            mode: mode.into(),
            message: message.into(),
        }
    }

    pub fn limit_exceeded(message: impl Into<String>) -> Self {
        Self::LimitExceeded {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            message: e.to_string(),
            source: Some(e),
        }
    }
}
