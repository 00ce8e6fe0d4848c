use std::io;
use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::AcquireError;

/// Coarse classification of an [`Error`], used by callers that only care
/// whether something was structural, per-item or a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Schema,
    FormatUnavailable,
    Resolution,
    Network,
    Filesystem,
    Cancelled,
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("page is not a valid catalog page: {0}")]
    Schema(String),

    #[error("format `{requested}` is not available, available formats: [{}]", available.join(", "))]
    FormatUnavailable {
        requested: String,
        available: Vec<String>,
    },

    #[error("no download entry matching `{format}` on {url}")]
    Resolution { url: String, format: String },

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with status {status}")]
    HttpStatus { url: String, status: StatusCode },

    #[error("{url} did not report a content length")]
    MissingContentLength { url: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("{}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("worker {worker} failed: {reason}")]
    Worker { worker: usize, reason: String },

    #[error("worker pool closed before every chunk was scheduled")]
    PoolClosed(#[from] AcquireError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Schema(_) => ErrorKind::Schema,
            Error::FormatUnavailable { .. } => ErrorKind::FormatUnavailable,
            Error::Resolution { .. } => ErrorKind::Resolution,
            Error::Network { .. }
            | Error::HttpStatus { .. }
            | Error::MissingContentLength { .. }
            | Error::Timeout { .. }
            | Error::InvalidUrl { .. } => ErrorKind::Network,
            Error::Filesystem { .. } => ErrorKind::Filesystem,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Worker { .. } | Error::PoolClosed(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn network(url: &str, source: reqwest::Error) -> Self {
        Error::Network {
            url: url.to_string(),
            source,
        }
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
