//! Configuration types
//!
//! All knobs the engine consumes are externally supplied and treated as
//! immutable inputs per invocation: concurrency counts, retry budgets, chunk
//! size, per-attempt timeouts. Every struct deserializes with sensible
//! per-field defaults so partial config files work out of the box.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Fixed read/write chunk size for transfers: 512 KiB
pub const CHUNK_SIZE: usize = 512 * 1024;

/// What the transfer manager does when a request fails permanently
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Report the failed task and keep processing its siblings (default)
    #[default]
    ContinueOnError,
    /// First permanent failure cancels all remaining work in the batch
    FailFast,
}

/// Retry behavior for transient transfer failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the initial one (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_secs")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_secs")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Transfer manager configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum concurrent transfers in a batch (default: 5)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-attempt network timeout covering connect and read (default: 30s)
    #[serde(default = "default_attempt_timeout", with = "duration_secs")]
    pub attempt_timeout: Duration,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Batch failure policy (default: continue on error)
    #[serde(default)]
    pub failure_mode: FailureMode,

    /// Directory used when a request does not name a destination path
    #[serde(default)]
    pub download_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            attempt_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            failure_mode: FailureMode::default(),
            download_dir: PathBuf::from("."),
        }
    }
}

/// Transfer cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Path of the JSON cache index; the surrounding application owns the
    /// location, this crate only reads and writes through it
    pub index_path: PathBuf,

    /// Entries older than this are dropped on load (default: 7 days)
    #[serde(default = "default_max_age", with = "duration_secs")]
    pub max_age: Duration,

    /// Entries verified longer ago than this are re-hashed before reuse
    /// (default: 24 hours)
    #[serde(default = "default_verify_interval", with = "duration_secs")]
    pub verify_interval: Duration,
}

impl CacheConfig {
    /// Cache config rooted at the given index file, with default ageing.
    pub fn at(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            max_age: default_max_age(),
            verify_interval: default_verify_interval(),
        }
    }
}

/// Installation scheduler configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum installation tasks running at once (default: 3). Independent of
    /// the transfer concurrency each task drives internally.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Transfer configuration handed to backends for their file batches
    #[serde(default)]
    pub download: DownloadConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            download: DownloadConfig::default(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    5
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_age() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

fn default_verify_interval() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_max_concurrent_tasks() -> usize {
    3
}

/// Serialize `Duration` as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
