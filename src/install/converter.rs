//! Backend event conversion
//!
//! Translates the backend-native event shape into typed [`InstallEvents`]
//! invocations so tasks never learn the caller's callback dialect. The
//! mapping is pure per event; the only state carried is the last announced
//! maximum and the start/finish latches.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::events::InstallEvents;
use crate::install::backend::BackendEvent;

/// Maps [`BackendEvent`]s onto an [`InstallEvents`] observer.
///
/// `Status` emits `start` once, then `status(text)`. `Max` records the total
/// and emits `size`. `Progress` emits `progress` as a percentage of the last
/// announced max, and `finished` once progress reaches it. `Raw` events with
/// unknown names are dropped with a diagnostic, never propagated.
pub struct CallbackConverter {
    events: Arc<dyn InstallEvents>,
    started: AtomicBool,
    max: AtomicU64,
    finish_emitted: AtomicBool,
}

impl CallbackConverter {
    /// Converter feeding the given observer.
    pub fn new(events: Arc<dyn InstallEvents>) -> Self {
        Self {
            events,
            started: AtomicBool::new(false),
            max: AtomicU64::new(0),
            finish_emitted: AtomicBool::new(false),
        }
    }

    /// Emit `start` once; later calls are absorbed. Used by the scheduler at
    /// dispatch so `start` precedes any backend event.
    pub fn start(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            self.events.start();
        }
    }

    /// Translate one backend event into observer invocations.
    pub fn convert(&self, event: BackendEvent) {
        match event {
            BackendEvent::Status(text) => {
                self.start();
                self.events.status(&text);
            }
            BackendEvent::Max(total) => {
                self.max.store(total, Ordering::SeqCst);
                self.events.size(total);
            }
            BackendEvent::Progress(value) => {
                let max = self.max.load(Ordering::SeqCst);
                if max == 0 {
                    tracing::debug!(value, "progress before max announcement, dropped");
                    return;
                }
                let percent = ((value.min(max) * 100) / max) as u8;
                self.events.progress(percent);
                if value >= max && !self.finish_emitted.swap(true, Ordering::SeqCst) {
                    self.events.finished();
                }
            }
            BackendEvent::Raw { name, .. } => {
                tracing::debug!(name, "unknown backend event dropped");
            }
        }
    }
}
