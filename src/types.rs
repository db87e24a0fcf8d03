//! Core types for launcher-dl

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::events::ErrorDetail;

/// One remote-resource-to-local-file download request.
///
/// Immutable once submitted to the transfer manager.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Remote resource URL
    pub url: String,
    /// Destination path; when absent the manager defaults it from the URL's
    /// final path segment under its configured download directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Expected size in bytes, when known up front
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Expected SHA-256 checksum (lowercase hex); also the cache key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl DownloadRequest {
    /// Request for the given URL with no destination, size, or checksum.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            path: None,
            size: None,
            checksum: None,
        }
    }

    /// Set the destination path.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the expected size in bytes.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the expected SHA-256 checksum.
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Final path segment of the destination or, failing that, of the URL.
    pub fn file_name(&self) -> String {
        if let Some(name) = self
            .path
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
        {
            return name.to_string();
        }
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut s| s.next_back().map(str::to_string))
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "download".to_string())
    }

    /// Destination path, defaulting into `download_dir` when unset.
    pub fn resolved_path(&self, download_dir: &Path) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None => download_dir.join(self.file_name()),
        }
    }
}

/// Lifecycle of one transfer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Queued, not yet dispatched
    #[default]
    Pending,
    /// Currently transferring
    Active,
    /// Completed and (when a checksum was declared) verified
    Succeeded,
    /// Exhausted its retry budget
    Failed,
    /// Cancelled cooperatively
    Cancelled,
}

impl TransferStatus {
    /// True for Succeeded, Failed, and Cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Succeeded | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

/// Snapshot of one transfer, owned exclusively by the transfer manager.
///
/// The single-transfer engine never mutates this directly; it reports through
/// events and return values, and the manager merges those into its table.
#[derive(Clone, Debug, Default)]
pub struct TransferState {
    /// Bytes written so far; high-water mark across retry attempts so the
    /// batch aggregate never decreases
    pub downloaded: u64,
    /// Total bytes, unknown until resolved from the request or response
    pub total: Option<u64>,
    /// Current lifecycle state
    pub status: TransferStatus,
    /// Number of attempts started; strictly increases on each retry
    pub attempt_count: u32,
    /// Latest smoothed transfer rate, bytes per second
    pub speed: u64,
    /// Classification of the most recent failure
    pub last_error: Option<ErrorDetail>,
}

impl TransferState {
    /// Percentage progress; `None` until the total is known.
    pub fn percent(&self) -> Option<u8> {
        let total = self.total?;
        if total == 0 {
            return Some(100);
        }
        let capped = self.downloaded.min(total);
        Some(((capped * 100) / total) as u8)
    }
}

/// Summary of a drained transfer batch
#[derive(Clone, Debug)]
pub struct BatchReport {
    /// Requests that completed successfully (including cache hits)
    pub succeeded: usize,
    /// Requests that failed permanently
    pub failed: usize,
    /// Requests that were cancelled before completing
    pub cancelled: usize,
    /// Total bytes written across the batch
    pub bytes_downloaded: u64,
    /// Wall-clock time from dispatch to drain
    pub elapsed: Duration,
}
