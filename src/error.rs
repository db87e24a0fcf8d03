//! Error types for launcher-dl
//!
//! Every failure is classified exactly once, at the point of detection, into
//! the taxonomy below. Upstream components (manager, scheduler, converter)
//! pass the classified error through unchanged.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for launcher-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for launcher-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Remote resource does not exist (HTTP 404 equivalent)
    #[error("not found: {0}")]
    NotFound(String),

    /// Remote refused access (HTTP 403 equivalent)
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Connection-level network failure
    #[error("network error: {0}")]
    Network(String),

    /// Per-attempt timeout elapsed
    #[error("timed out: {0}")]
    Timeout(String),

    /// Destination could not be created or written
    #[error("filesystem error at {path}: {message}")]
    Filesystem {
        /// Destination path that could not be written
        path: PathBuf,
        /// Underlying I/O failure description
        message: String,
    },

    /// Downloaded content did not match the declared checksum
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// File whose content failed verification
        path: PathBuf,
        /// Checksum declared by the request
        expected: String,
        /// Checksum computed from the downloaded bytes
        actual: String,
    },

    /// Operation was cancelled cooperatively
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Request is malformed (bad URL, missing required field)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Version manifest could not be fetched or parsed
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Installation task not found in the scheduler registry
    #[error("task {0} not found")]
    TaskNotFound(u64),

    /// Batch completed with permanent per-task failures
    #[error("{failed} of {total} transfers failed permanently")]
    BatchFailed {
        /// Number of requests that exhausted their retry budget
        failed: usize,
        /// Number of requests in the batch
        total: usize,
    },

    /// Wrapped underlying failure that fits no other class
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Classify a `reqwest` failure.
    ///
    /// Status-bearing responses are classified by their status code before
    /// this is reached; what arrives here are transport-level failures.
    pub(crate) fn from_reqwest(err: reqwest::Error, url: &str) -> Self {
        if err.is_timeout() {
            Error::Timeout(format!("{url}: {err}"))
        } else if err.is_connect() || err.is_request() || err.is_body() || err.is_decode() {
            Error::Network(format!("{url}: {err}"))
        } else {
            Error::Unexpected(format!("{url}: {err}"))
        }
    }

    /// Classify an HTTP status code returned by the remote.
    pub(crate) fn from_status(status: reqwest::StatusCode, url: &str) -> Self {
        match status.as_u16() {
            404 | 410 => Error::NotFound(url.to_string()),
            401 | 403 => Error::PermissionDenied(url.to_string()),
            _ => Error::Unexpected(format!("HTTP {status} for {url}")),
        }
    }

    /// Classify a destination-side I/O failure.
    pub(crate) fn from_io(err: std::io::Error, path: &std::path::Path) -> Self {
        Error::Filesystem {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    /// Stable machine-readable kind name, for presentation layers that render
    /// errors without inspecting variants.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::PermissionDenied(_) => "permission_denied",
            Error::Network(_) => "network",
            Error::Timeout(_) => "timeout",
            Error::Filesystem { .. } => "filesystem",
            Error::ChecksumMismatch { .. } => "checksum_mismatch",
            Error::Cancelled(_) => "cancelled",
            Error::InvalidRequest(_) => "invalid_request",
            Error::InvalidManifest(_) => "invalid_manifest",
            Error::TaskNotFound(_) => "task_not_found",
            Error::BatchFailed { .. } => "batch_failed",
            Error::Unexpected(_) => "unexpected",
        }
    }

    /// True when the error carries the cancelled kind.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}
