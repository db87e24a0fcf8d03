//! Checksum-keyed transfer cache
//!
//! Remembers verified downloads so repeated batches skip the network. Entries
//! are keyed by the request's declared SHA-256 checksum; requests without one
//! can never hit. The index is a single JSON file owned by the surrounding
//! application; it is rewritten whole on every mutation and treated as
//! disposable (a corrupt or missing index just starts the cache empty).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::types::DownloadRequest;

/// One verified download remembered by the cache
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    /// SHA-256 checksum of the content, also the cache key
    pub key: String,
    /// Local path the verified content lives at
    pub path: PathBuf,
    /// Content size in bytes
    pub size: u64,
    /// When the content was last hashed and found to match
    pub verified_at: DateTime<Utc>,
}

/// Point-in-time summary of the cache contents
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of live entries
    pub entries: usize,
    /// Summed size of the cached files in bytes
    pub total_bytes: u64,
}

#[derive(Default, Serialize, Deserialize)]
struct IndexFile {
    entries: Vec<CacheEntry>,
}

/// Checksum-keyed cache of verified downloads, safe to share across workers.
#[derive(Debug)]
pub struct TransferCache {
    config: CacheConfig,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl TransferCache {
    /// Load the cache from its JSON index.
    ///
    /// A missing or unreadable index starts the cache empty. Entries whose
    /// last verification is older than `max_age`, or whose file no longer
    /// exists, are dropped during load.
    pub async fn load(config: CacheConfig) -> Self {
        let mut entries = HashMap::new();
        match tokio::fs::read(&config.index_path).await {
            Ok(bytes) => match serde_json::from_slice::<IndexFile>(&bytes) {
                Ok(index) => {
                    let now = Utc::now();
                    let max_age = chrono::Duration::from_std(config.max_age)
                        .unwrap_or_else(|_| chrono::Duration::days(7));
                    for entry in index.entries {
                        if now - entry.verified_at > max_age {
                            tracing::debug!(key = %entry.key, "dropping expired cache entry");
                            continue;
                        }
                        if !entry.path.exists() {
                            tracing::debug!(
                                key = %entry.key,
                                path = %entry.path.display(),
                                "dropping cache entry for missing file"
                            );
                            continue;
                        }
                        entries.insert(entry.key.clone(), entry);
                    }
                    tracing::info!(entries = entries.len(), "transfer cache loaded");
                }
                Err(e) => {
                    tracing::warn!(
                        path = %config.index_path.display(),
                        error = %e,
                        "cache index unreadable, starting empty"
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %config.index_path.display(), "no cache index yet");
            }
            Err(e) => {
                tracing::warn!(
                    path = %config.index_path.display(),
                    error = %e,
                    "cache index unreadable, starting empty"
                );
            }
        }
        Self {
            config,
            entries: Mutex::new(entries),
        }
    }

    /// Look up a request. Requests without a declared checksum always miss.
    ///
    /// A hit requires the cached file to still exist and, when the entry is
    /// stale per `verify_interval`, to still hash to the key. A mismatch
    /// evicts the entry and reports a miss.
    pub async fn lookup(&self, request: &DownloadRequest) -> Option<CacheEntry> {
        let key = request.checksum.as_deref()?;

        let entry = {
            let entries = self.entries.lock().await;
            entries.get(key).cloned()?
        };

        if !entry.path.exists() {
            tracing::debug!(key, "cached file gone, evicting");
            self.evict(key).await;
            return None;
        }

        let verify_interval = chrono::Duration::from_std(self.config.verify_interval)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        if Utc::now() - entry.verified_at <= verify_interval {
            return Some(entry);
        }

        // Stale entry: trust nothing, re-hash before reuse.
        match sha256_file(&entry.path).await {
            Ok(actual) if actual == entry.key => {
                let refreshed = CacheEntry {
                    verified_at: Utc::now(),
                    ..entry
                };
                {
                    let mut entries = self.entries.lock().await;
                    entries.insert(refreshed.key.clone(), refreshed.clone());
                }
                if let Err(e) = self.persist().await {
                    tracing::warn!(error = %e, "failed to persist cache index");
                }
                Some(refreshed)
            }
            Ok(actual) => {
                tracing::warn!(key, actual, "cached file content drifted, evicting");
                self.evict(key).await;
                None
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to re-hash cached file, evicting");
                self.evict(key).await;
                None
            }
        }
    }

    /// Record a verified download. Requests without a checksum are not
    /// cacheable and are ignored.
    pub async fn record(&self, request: &DownloadRequest, path: &Path, size: u64) -> Result<()> {
        let Some(key) = request.checksum.clone() else {
            return Ok(());
        };
        let entry = CacheEntry {
            key: key.clone(),
            path: path.to_path_buf(),
            size,
            verified_at: Utc::now(),
        };
        {
            let mut entries = self.entries.lock().await;
            entries.insert(key, entry);
        }
        self.persist().await
    }

    /// Current entry count and summed byte size.
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().await;
        CacheStats {
            entries: entries.len(),
            total_bytes: entries.values().map(|e| e.size).sum(),
        }
    }

    async fn evict(&self, key: &str) {
        let removed = {
            let mut entries = self.entries.lock().await;
            entries.remove(key).is_some()
        };
        if removed {
            if let Err(e) = self.persist().await {
                tracing::warn!(error = %e, "failed to persist cache index after eviction");
            }
        }
    }

    /// Rewrite the whole JSON index from the in-memory map.
    async fn persist(&self) -> Result<()> {
        let index = {
            let entries = self.entries.lock().await;
            IndexFile {
                entries: entries.values().cloned().collect(),
            }
        };
        let bytes = serde_json::to_vec_pretty(&index)
            .map_err(|e| Error::Unexpected(format!("failed to encode cache index: {e}")))?;
        if let Some(parent) = self.config.index_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::from_io(e, parent))?;
        }
        tokio::fs::write(&self.config.index_path, bytes)
            .await
            .map_err(|e| Error::from_io(e, &self.config.index_path))
    }
}

/// SHA-256 of a file's contents as lowercase hex, computed on a blocking
/// worker so large files never stall the async executor.
pub(crate) async fn sha256_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path).map_err(|e| Error::from_io(e, &path))?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher).map_err(|e| Error::from_io(e, &path))?;
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| Error::Unexpected(format!("hashing task panicked: {e}")))?
}
