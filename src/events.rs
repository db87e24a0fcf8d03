//! Callback registry and typed event interfaces
//!
//! Consumers hand the engine a [`CallbackGroup`]: a name-keyed table of
//! [`Callbacks`] slot tables, one per concern ("download", "install",
//! "verify"). Lookup never fails — a missing slot resolves to an explicit
//! no-op and a missing group resolves to a shared empty table, so callers
//! only register the events they care about.
//!
//! The engine itself never touches slot names directly; it speaks through
//! the typed event traits ([`SingleTransferEvents`], [`BatchTransferEvents`],
//! [`InstallEvents`]), each a fixed enumerated set of event signatures with
//! no-op defaults. `Callbacks` implements all three by dispatching to the
//! matching named slot.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Error;

/// Stable, presentation-ready description of a failure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorDetail {
    /// Machine-readable error kind (see [`Error::kind`])
    pub kind: &'static str,
    /// Human-readable detail
    pub message: String,
}

impl ErrorDetail {
    /// Capture kind and message from a classified error.
    pub fn of(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Typed argument tuple delivered to a callback slot
#[derive(Clone, Debug)]
pub enum Payload {
    /// No arguments (`start`, batch-level `finished`)
    None,
    /// Overall or per-task percentage, 0-100
    Percent(u8),
    /// Byte-level progress of one transfer
    Bytes {
        /// Bytes written so far
        downloaded: u64,
        /// Total bytes, 0 while unknown
        total: u64,
    },
    /// Transfer rate in bytes per second
    Rate(u64),
    /// Total or downloaded byte count for a batch
    Size(u64),
    /// Free-form status text from a backend
    Text(String),
    /// Per-task percentages keyed by task id
    TaskMap(HashMap<String, u8>),
    /// Task identifier (`finished(task_id)`)
    Task(String),
    /// Batch-level failure (`error(err)`)
    Failure(ErrorDetail),
    /// Per-task failure (`error(task_id, err)`)
    TaskFailure {
        /// Task the failure belongs to
        task: String,
        /// Classified failure detail
        error: ErrorDetail,
    },
}

/// A registered event handler
pub type Handler = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Name-keyed table of event handlers.
///
/// Invoking an absent slot is defined behavior (a no-op), not an error.
/// Unknown slot names are silently inert; this favors caller ergonomics over
/// construction-time strictness.
#[derive(Clone, Default)]
pub struct Callbacks {
    slots: HashMap<String, Handler>,
    verbose: bool,
}

impl Callbacks {
    /// Empty slot table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable missing-slot diagnostics: invoking an unregistered slot logs
    /// the slot name at debug level instead of vanishing silently.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Register a handler for the named slot, replacing any previous one.
    pub fn on<F>(mut self, slot: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.slots.insert(slot.into(), Arc::new(handler));
        self
    }

    /// True if a handler is registered for the named slot.
    pub fn has(&self, slot: &str) -> bool {
        self.slots.contains_key(slot)
    }

    /// Invoke the named slot with the given payload. Missing slots are an
    /// explicit no-op path.
    pub fn invoke(&self, slot: &str, payload: Payload) {
        match self.slots.get(slot) {
            Some(handler) => handler(&payload),
            None if self.verbose => {
                tracing::debug!(slot, "no handler registered, event absorbed");
            }
            None => {}
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("slots", &self.slots.keys().collect::<Vec<_>>())
            .field("verbose", &self.verbose)
            .finish()
    }
}

/// Name-keyed table of [`Callbacks`], grouped by concern.
///
/// An absent group resolves to a shared empty slot table, never `None`.
#[derive(Clone, Debug, Default)]
pub struct CallbackGroup {
    groups: HashMap<String, Arc<Callbacks>>,
    empty: Arc<Callbacks>,
}

impl CallbackGroup {
    /// Empty group table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a slot table under the given group name.
    pub fn with(mut self, name: impl Into<String>, callbacks: Callbacks) -> Self {
        self.groups.insert(name.into(), Arc::new(callbacks));
        self
    }

    /// Resolve a group by name; misses yield the shared empty table.
    pub fn group(&self, name: &str) -> Arc<Callbacks> {
        match self.groups.get(name) {
            Some(callbacks) => Arc::clone(callbacks),
            None => {
                tracing::warn!(group = name, "callback group not registered, using empty group");
                Arc::clone(&self.empty)
            }
        }
    }
}

/// Events emitted by one transfer
#[allow(unused_variables)]
pub trait SingleTransferEvents: Send + Sync {
    /// Transfer started
    fn start(&self) {}
    /// Percentage progress, 0-100; withheld until the total size is known
    fn progress(&self, percent: u8) {}
    /// Byte-level progress; total is 0 while unknown
    fn bytes_downloaded(&self, downloaded: u64, total: u64) {}
    /// Smoothed transfer rate in bytes per second
    fn speed(&self, bytes_per_sec: u64) {}
    /// Transfer completed successfully
    fn finished(&self) {}
    /// Transfer failed; classification is final
    fn error(&self, err: &Error) {}
}

/// Aggregated events emitted by a transfer batch
#[allow(unused_variables)]
pub trait BatchTransferEvents: Send + Sync {
    /// Batch started
    fn start(&self) {}
    /// Per-task percentages keyed by task id
    fn tasks_progress(&self, progress: &HashMap<String, u8>) {}
    /// Total batch size in bytes, emitted once all totals are known
    fn size(&self, bytes: u64) {}
    /// Bytes downloaded across the batch; monotonically non-decreasing
    fn downloaded_size(&self, bytes: u64) {}
    /// Summed transfer rate across active transfers
    fn speed(&self, bytes_per_sec: u64) {}
    /// Overall percentage, 0-100
    fn progress(&self, percent: u8) {}
    /// One per successfully completed request
    fn task_finished(&self, task_id: &str) {}
    /// One per request that exhausted its retry budget
    fn task_error(&self, task_id: &str, err: &Error) {}
    /// Batch fully drained with zero permanent failures
    fn finished(&self) {}
    /// Batch-level failure (fail-fast trigger or failure summary)
    fn error(&self, err: &Error) {}
}

/// Events emitted by one installation task
#[allow(unused_variables)]
pub trait InstallEvents: Send + Sync {
    /// Task started
    fn start(&self) {}
    /// Backend status text
    fn status(&self, text: &str) {}
    /// Task progress, 0-100
    fn progress(&self, percent: u8) {}
    /// Total work size reported by the backend
    fn size(&self, total: u64) {}
    /// Task reached Succeeded
    fn finished(&self) {}
    /// Task reached Failed or Cancelled
    fn error(&self, err: &Error) {}
}

impl SingleTransferEvents for Callbacks {
    fn start(&self) {
        self.invoke("start", Payload::None);
    }

    fn progress(&self, percent: u8) {
        self.invoke("progress", Payload::Percent(percent));
    }

    fn bytes_downloaded(&self, downloaded: u64, total: u64) {
        self.invoke("bytes_downloaded", Payload::Bytes { downloaded, total });
    }

    fn speed(&self, bytes_per_sec: u64) {
        self.invoke("speed", Payload::Rate(bytes_per_sec));
    }

    fn finished(&self) {
        self.invoke("finished", Payload::None);
    }

    fn error(&self, err: &Error) {
        self.invoke("error", Payload::Failure(ErrorDetail::of(err)));
    }
}

impl BatchTransferEvents for Callbacks {
    fn start(&self) {
        self.invoke("start", Payload::None);
    }

    fn tasks_progress(&self, progress: &HashMap<String, u8>) {
        self.invoke("tasks_progress", Payload::TaskMap(progress.clone()));
    }

    fn size(&self, bytes: u64) {
        self.invoke("size", Payload::Size(bytes));
    }

    fn downloaded_size(&self, bytes: u64) {
        self.invoke("downloaded_size", Payload::Size(bytes));
    }

    fn speed(&self, bytes_per_sec: u64) {
        self.invoke("speed", Payload::Rate(bytes_per_sec));
    }

    fn progress(&self, percent: u8) {
        self.invoke("progress", Payload::Percent(percent));
    }

    fn task_finished(&self, task_id: &str) {
        self.invoke("finished", Payload::Task(task_id.to_string()));
    }

    fn task_error(&self, task_id: &str, err: &Error) {
        self.invoke(
            "error",
            Payload::TaskFailure {
                task: task_id.to_string(),
                error: ErrorDetail::of(err),
            },
        );
    }

    fn finished(&self) {
        self.invoke("finished", Payload::None);
    }

    fn error(&self, err: &Error) {
        self.invoke("error", Payload::Failure(ErrorDetail::of(err)));
    }
}

impl InstallEvents for Callbacks {
    fn start(&self) {
        self.invoke("start", Payload::None);
    }

    fn status(&self, text: &str) {
        self.invoke("status", Payload::Text(text.to_string()));
    }

    fn progress(&self, percent: u8) {
        self.invoke("progress", Payload::Percent(percent));
    }

    fn size(&self, total: u64) {
        self.invoke("size", Payload::Size(total));
    }

    fn finished(&self) {
        self.invoke("finished", Payload::None);
    }

    fn error(&self, err: &Error) {
        self.invoke("error", Payload::Failure(ErrorDetail::of(err)));
    }
}
