//! Error taxonomy for collection runs

use std::time::Duration;

/// How far an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Retried locally with backoff
    Transient,
    /// Fails one item; the source continues
    Item,
    /// Stops one source; other sources continue
    Source,
    /// Stops the whole run
    Run,
}

/// Error from talking to a source or writing what it returned.
#[derive(Debug)]
pub enum FetchError {
    /// Missing or rejected credential
    Authentication {
        status: Option<u16>,
        message: String,
    },
    /// HTTP 429, optionally with a server-provided delay
    RateLimited { retry_after: Option<Duration> },
    /// Connection failure or non-success HTTP status
    Network {
        status: Option<u16>,
        message: String,
    },
    /// Response body could not be decoded
    Schema(String),
    /// Local disk failure while persisting
    Storage(std::io::Error),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication {
                status: Some(s),
                message,
            } => write!(f, "authentication failed (HTTP {s}): {message}"),
            Self::Authentication {
                status: None,
                message,
            } => write!(f, "authentication failed: {message}"),
            Self::RateLimited {
                retry_after: Some(d),
            } => write!(f, "rate limited (retry after {}s)", d.as_secs()),
            Self::RateLimited { retry_after: None } => f.write_str("rate limited"),
            Self::Network {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Network {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Schema(msg) => write!(f, "malformed response: {msg}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for FetchError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e.into_io())
    }
}

impl FetchError {
    /// Create error from reqwest error (URL stripped to keep API keys out of logs)
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        let message = e.without_url().to_string();
        match status {
            Some(429) => Self::RateLimited { retry_after: None },
            Some(status @ (401 | 403)) => Self::Authentication {
                status: Some(status),
                message,
            },
            status => Self::Network { status, message },
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::RateLimited { .. } => Severity::Transient,
            Self::Network { status, .. } => match status {
                None | Some(408) | Some(500..=599) => Severity::Transient,
                Some(_) => Severity::Item,
            },
            Self::Schema(_) => Severity::Item,
            Self::Authentication { .. } => Severity::Source,
            Self::Storage(_) => Severity::Run,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.severity() == Severity::Transient
    }

    /// Server-requested delay before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Failure writing or reading the on-disk archive.
#[derive(Debug)]
pub struct StorageError {
    pub path: std::path::PathBuf,
    pub source: std::io::Error,
}

impl StorageError {
    pub fn new(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }

    fn into_io(self) -> std::io::Error {
        std::io::Error::new(
            self.source.kind(),
            format!("{}: {}", self.path.display(), self.source),
        )
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
