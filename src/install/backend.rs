//! Backend adapter boundary
//!
//! The scheduler never talks to an installation library directly; it drives
//! an [`InstallBackend`] and receives the backend's native event shape
//! through an [`EventSink`]. Swapping backends touches neither the scheduler
//! nor the tasks.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::events::BatchTransferEvents;
use crate::transfer::cache::sha256_file;
use crate::transfer::{BatchHandle, TransferCache, TransferManager};
use crate::types::DownloadRequest;

/// Backend-native event shape, before conversion into the callback fabric.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendEvent {
    /// Free-form phase description
    Status(String),
    /// Units of work completed so far
    Progress(u64),
    /// Total units of work for the operation
    Max(u64),
    /// Anything else the backend produces; unknown names are dropped by the
    /// converter, never propagated
    Raw {
        /// Backend-private event name
        name: String,
        /// Stringified event value, when the backend supplied one
        value: Option<String>,
    },
}

/// Channel a backend reports its native events through
pub type EventSink = Arc<dyn Fn(BackendEvent) + Send + Sync>;

/// The installation capability set the scheduler executes tasks against.
#[async_trait]
pub trait InstallBackend: Send + Sync {
    /// Resolve the version's file set and place it under `target_dir`.
    async fn install_version(
        &self,
        version: &str,
        target_dir: &Path,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Check an installed version's files against their expected hashes.
    async fn verify_version(
        &self,
        version: &str,
        target_dir: &Path,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// One file named by a version manifest
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Path relative to the installation target directory
    pub path: PathBuf,
    /// Remote source URL
    pub url: String,
    /// Expected size in bytes
    pub size: u64,
    /// Expected SHA-256 checksum, lowercase hex
    pub sha256: String,
}

/// Remote description of a version's file set
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionManifest {
    /// Version the manifest describes
    pub version: String,
    /// Files making up the installation
    pub files: Vec<ManifestFile>,
}

/// Backend that resolves versions from remote JSON manifests and drives the
/// transfer manager for their file sets.
pub struct ManifestBackend {
    base_url: String,
    client: reqwest::Client,
    download: DownloadConfig,
    cache: Option<Arc<TransferCache>>,
}

impl ManifestBackend {
    /// Backend fetching manifests from `{base_url}/{version}.json`.
    pub fn new(base_url: impl Into<String>, download: DownloadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(download.attempt_timeout)
            .build()
            .map_err(|e| Error::Unexpected(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
            download,
            cache: None,
        })
    }

    /// Attach a transfer cache consulted for each manifest file.
    pub fn with_cache(mut self, cache: Arc<TransferCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    async fn fetch_manifest(&self, version: &str) -> Result<VersionManifest> {
        let url = format!("{}/{version}.json", self.base_url.trim_end_matches('/'));
        tracing::debug!(url, "fetching version manifest");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::from_reqwest(e, &url))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status, &url));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::from_reqwest(e, &url))?;

        let manifest: VersionManifest = serde_json::from_slice(&bytes)
            .map_err(|e| Error::InvalidManifest(format!("{url}: {e}")))?;
        if manifest.version != version {
            return Err(Error::InvalidManifest(format!(
                "manifest at {url} describes version {}, requested {version}",
                manifest.version
            )));
        }
        Ok(manifest)
    }

    fn requests_for(manifest: &VersionManifest, target_dir: &Path) -> Vec<DownloadRequest> {
        manifest
            .files
            .iter()
            .map(|file| {
                DownloadRequest::new(file.url.clone())
                    .with_path(target_dir.join(&file.path))
                    .with_size(file.size)
                    .with_checksum(file.sha256.clone())
            })
            .collect()
    }
}

#[async_trait]
impl InstallBackend for ManifestBackend {
    async fn install_version(
        &self,
        version: &str,
        target_dir: &Path,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(version.to_string()));
        }

        sink(BackendEvent::Status(format!("resolving manifest for {version}")));
        let manifest = self.fetch_manifest(version).await?;
        let total = manifest.files.len();

        sink(BackendEvent::Max(total as u64));
        sink(BackendEvent::Status(format!(
            "downloading {total} files for {version}"
        )));

        let mut manager = TransferManager::new(self.download.clone())?;
        if let Some(cache) = &self.cache {
            manager = manager.with_cache(cache.clone());
        }

        let handle = BatchHandle::linked_to(&cancel);
        let report = manager
            .schedule(
                Self::requests_for(&manifest, target_dir),
                Arc::new(SinkProgress::new(sink.clone())),
                &handle,
            )
            .await?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled(version.to_string()));
        }
        if report.failed > 0 {
            return Err(Error::BatchFailed {
                failed: report.failed,
                total,
            });
        }

        sink(BackendEvent::Status(format!("{version} installed")));
        Ok(())
    }

    async fn verify_version(
        &self,
        version: &str,
        target_dir: &Path,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<()> {
        sink(BackendEvent::Status(format!("verifying {version}")));
        let manifest = self.fetch_manifest(version).await?;
        sink(BackendEvent::Max(manifest.files.len() as u64));

        for (index, file) in manifest.files.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled(version.to_string()));
            }

            let path = target_dir.join(&file.path);
            if !path.exists() {
                return Err(Error::Filesystem {
                    path,
                    message: "file missing from installation".to_string(),
                });
            }
            let actual = sha256_file(&path).await?;
            if actual != file.sha256 {
                return Err(Error::ChecksumMismatch {
                    path,
                    expected: file.sha256.clone(),
                    actual,
                });
            }
            sink(BackendEvent::Progress(index as u64 + 1));
        }

        sink(BackendEvent::Status(format!("{version} verified")));
        Ok(())
    }
}

/// Adapts batch completions into backend-native progress units: one unit per
/// finished file.
struct SinkProgress {
    sink: EventSink,
    done: AtomicU64,
}

impl SinkProgress {
    fn new(sink: EventSink) -> Self {
        Self {
            sink,
            done: AtomicU64::new(0),
        }
    }
}

impl BatchTransferEvents for SinkProgress {
    fn task_finished(&self, _task_id: &str) {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        (self.sink)(BackendEvent::Progress(done));
    }
}
