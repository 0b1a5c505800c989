//! Error types.

use std::path::PathBuf;

use crate::document::Document;

/// Errors that prevent the gateway from starting.
///
/// None of these are retried: a missing token or CA bundle is an operator
/// error and the process exits.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to read service account token from {path}: {source}")]
    TokenRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("service account token at {0} is empty")]
    EmptyToken(PathBuf),

    #[error("failed to read CA certificate from {path}: {source}")]
    CaRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse CA certificate bundle at {path}: {reason}")]
    CaParse { path: PathBuf, reason: String },

    #[error("invalid upstream URL {url}: {reason}")]
    InvalidUpstreamUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// A failed upstream fetch.
///
/// Callers treat every variant as the same "fetch failed" condition; the
/// variant only matters for logs.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Connection, TLS, or timeout failure before a response arrived.
    #[error("upstream request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The upstream answered with a non-success status.
    #[error("upstream returned status {0}")]
    Status(u16),

    /// The response body exceeded the size ceiling.
    #[error("upstream response exceeds maximum size of {max_size} bytes")]
    TooLarge { max_size: usize },

    /// The connection failed while the body was being read.
    #[error("failed to read upstream response body: {0}")]
    BodyRead(#[source] reqwest::Error),
}

impl UpstreamError {
    /// Short classification for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Transport(e) if e.is_timeout() => "timeout",
            UpstreamError::Transport(e) if e.is_connect() => "connect",
            UpstreamError::Transport(_) => "transport",
            UpstreamError::Status(_) => "status",
            UpstreamError::TooLarge { .. } => "too_large",
            UpstreamError::BodyRead(_) => "body_read",
        }
    }
}

/// A failure while normalizing an upstream document.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The upstream body is not valid JSON. This is an upstream fault.
    #[error("upstream document is not valid JSON: {0}")]
    Parse(#[source] serde_json::Error),

    /// Parsed JSON could not be written back out. This is a gateway fault.
    #[error("failed to serialize document: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// A probe could not refresh one of the documents.
#[derive(Debug, thiserror::Error)]
pub enum PopulateError {
    #[error("failed to fetch {document}: {source}")]
    Fetch {
        document: Document,
        #[source]
        source: UpstreamError,
    },

    #[error("failed to format {document}: {source}")]
    Format {
        document: Document,
        #[source]
        source: FormatError,
    },

    /// The population task panicked or was aborted.
    #[error("population task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
