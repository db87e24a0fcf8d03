//! # launcher-dl
//!
//! Download and installation engine for a game-distribution launcher.
//!
//! ## Design Philosophy
//!
//! launcher-dl is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers register callbacks, no polling required
//! - **Resilient** - Bounded concurrency, retry with backoff, checksum
//!   verification, cooperative cancellation
//! - **Sensible defaults** - Works out of the box with zero configuration
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use launcher_dl::{
//!     BatchHandle, Callbacks, DownloadConfig, DownloadRequest, Payload, TransferManager,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = TransferManager::new(DownloadConfig::default())?;
//!
//!     let events = Callbacks::new()
//!         .on("progress", |payload| {
//!             if let Payload::Percent(percent) = payload {
//!                 println!("{percent}%");
//!             }
//!         })
//!         .on("finished", |_| println!("done"));
//!
//!     let requests = vec![
//!         DownloadRequest::new("https://example.com/client.jar"),
//!         DownloadRequest::new("https://example.com/assets.zip"),
//!     ];
//!
//!     let report = manager
//!         .schedule(requests, Arc::new(events), &BatchHandle::new())
//!         .await?;
//!     println!("{} succeeded, {} failed", report.succeeded, report.failed);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Callback registry and typed event interfaces
pub mod events;
/// Installation scheduling over a pluggable backend
pub mod install;
/// Retry logic with exponential backoff
pub mod retry;
/// File transfer engine, batch manager, and cache
pub mod transfer;
/// Core request and state types
pub mod types;

// Re-export commonly used types
pub use config::{
    CacheConfig, DownloadConfig, FailureMode, RetryConfig, SchedulerConfig, CHUNK_SIZE,
};
pub use error::{Error, Result};
pub use events::{
    BatchTransferEvents, CallbackGroup, Callbacks, ErrorDetail, InstallEvents, Payload,
    SingleTransferEvents,
};
pub use install::{
    BackendEvent, CallbackConverter, EventSink, InstallBackend, InstallRequest, InstallScheduler,
    InstallTask, ManifestBackend, ManifestFile, SchedulerProgress, TaskId, TaskKind, TaskStatus,
    VersionManifest,
};
pub use retry::IsRetryable;
pub use transfer::{
    BatchHandle, CacheEntry, CacheStats, TransferCache, TransferEngine, TransferManager,
};
pub use types::{BatchReport, DownloadRequest, TransferState, TransferStatus};
