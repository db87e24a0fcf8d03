//! Installation scheduling
//!
//! Accepts installation requests, wraps each in an [`InstallTask`], and runs
//! them against the backend with bounded concurrency. Backend events flow
//! through the [`CallbackConverter`] into the caller's [`CallbackGroup`];
//! a per-task terminal gate guarantees at most one terminal event and drops
//! everything emitted after it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::events::{CallbackGroup, InstallEvents};
use crate::install::backend::{EventSink, InstallBackend};
use crate::install::converter::CallbackConverter;
use crate::install::task::{InstallTask, TaskId, TaskKind, TaskStatus};

/// One installation request submitted by the caller
#[derive(Clone, Debug)]
pub struct InstallRequest {
    /// Operation to perform
    pub kind: TaskKind,
    /// Version to operate on
    pub version: String,
    /// Installation root the operation works under
    pub target_dir: PathBuf,
}

/// Point-in-time tally of the scheduler's tasks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerProgress {
    /// Tasks ever submitted
    pub total: usize,
    /// Tasks currently running
    pub running: usize,
    /// Tasks that succeeded
    pub succeeded: usize,
    /// Tasks that failed
    pub failed: usize,
}

struct TaskEntry {
    task: InstallTask,
    cancel: CancellationToken,
    done: Arc<Notify>,
}

/// Runs installation tasks against a backend with bounded concurrency.
pub struct InstallScheduler {
    backend: Arc<dyn InstallBackend>,
    semaphore: Arc<Semaphore>,
    tasks: Arc<Mutex<HashMap<TaskId, TaskEntry>>>,
    next_id: AtomicU64,
}

impl InstallScheduler {
    /// Scheduler executing tasks against `backend`, at most
    /// `config.max_concurrent_tasks` at a time.
    pub fn new(backend: Arc<dyn InstallBackend>, config: &SchedulerConfig) -> Self {
        Self {
            backend,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1))),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Submit a request. Returns the task id immediately; the work proceeds
    /// under the scheduler's concurrency bound. Install tasks report into the
    /// group's `"install"` callbacks, verify tasks into `"verify"`.
    pub fn submit(&self, request: InstallRequest, group: &CallbackGroup) -> TaskId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let done = Arc::new(Notify::new());
        let task = InstallTask::new(id, request.kind, request.version.clone());
        tracing::info!(task = id, kind = ?request.kind, version = %request.version, "task submitted");

        {
            let mut tasks = lock_or_recover(&self.tasks);
            tasks.insert(
                id,
                TaskEntry {
                    task,
                    cancel: cancel.clone(),
                    done: done.clone(),
                },
            );
        }

        let group_name = match request.kind {
            TaskKind::InstallVersion => "install",
            TaskKind::VerifyVersion => "verify",
        };
        let gate: Arc<TerminalGate> = Arc::new(TerminalGate::new(group.group(group_name)));

        let worker = TaskWorker {
            id,
            request,
            backend: self.backend.clone(),
            semaphore: self.semaphore.clone(),
            tasks: self.tasks.clone(),
            cancel,
            gate,
            done,
        };
        tokio::spawn(worker.run());

        id
    }

    /// Cancel a task. Queued tasks settle Cancelled without running; running
    /// tasks abort cooperatively and settle Cancelled. Cancelling a task that
    /// already reached a terminal state is a no-op.
    pub fn cancel(&self, id: TaskId) -> Result<()> {
        let tasks = lock_or_recover(&self.tasks);
        let entry = tasks.get(&id).ok_or(Error::TaskNotFound(id))?;
        tracing::info!(task = id, "cancellation requested");
        entry.cancel.cancel();
        Ok(())
    }

    /// Current status of a task.
    pub fn status(&self, id: TaskId) -> Result<TaskStatus> {
        let tasks = lock_or_recover(&self.tasks);
        tasks
            .get(&id)
            .map(|entry| entry.task.status)
            .ok_or(Error::TaskNotFound(id))
    }

    /// Wait until a task reaches a terminal state and return it.
    pub async fn wait(&self, id: TaskId) -> Result<TaskStatus> {
        let done = {
            let tasks = lock_or_recover(&self.tasks);
            tasks
                .get(&id)
                .map(|entry| entry.done.clone())
                .ok_or(Error::TaskNotFound(id))?
        };
        loop {
            let notified = done.notified();
            let status = self.status(id)?;
            if status.is_terminal() {
                return Ok(status);
            }
            notified.await;
        }
    }

    /// Drop tasks that reached a terminal state from the registry and return
    /// how many were removed. Their ids become unknown to `status`, `wait`,
    /// and `cancel` afterwards, so callers should observe outcomes first.
    pub fn clear_finished(&self) -> usize {
        let mut tasks = lock_or_recover(&self.tasks);
        let before = tasks.len();
        tasks.retain(|_, entry| !entry.task.status.is_terminal());
        let removed = before - tasks.len();
        if removed > 0 {
            tracing::debug!(removed, "pruned finished tasks");
        }
        removed
    }

    /// Tally of the tasks currently in the registry.
    pub fn progress(&self) -> SchedulerProgress {
        let tasks = lock_or_recover(&self.tasks);
        let mut snapshot = SchedulerProgress {
            total: tasks.len(),
            ..SchedulerProgress::default()
        };
        for entry in tasks.values() {
            match entry.task.status {
                TaskStatus::Running => snapshot.running += 1,
                TaskStatus::Succeeded => snapshot.succeeded += 1,
                TaskStatus::Failed => snapshot.failed += 1,
                TaskStatus::Pending | TaskStatus::Cancelled => {}
            }
        }
        snapshot
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct TaskWorker {
    id: TaskId,
    request: InstallRequest,
    backend: Arc<dyn InstallBackend>,
    semaphore: Arc<Semaphore>,
    tasks: Arc<Mutex<HashMap<TaskId, TaskEntry>>>,
    cancel: CancellationToken,
    gate: Arc<TerminalGate>,
    done: Arc<Notify>,
}

impl TaskWorker {
    async fn run(self) {
        // Queued tasks react to cancellation without waiting for a slot.
        let permit = tokio::select! {
            _ = self.cancel.cancelled() => None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            self.settle(
                TaskStatus::Cancelled,
                Some(Error::Cancelled(self.request.version.clone())),
            );
            return;
        };

        let started = {
            let mut tasks = lock_or_recover(&self.tasks);
            tasks
                .get_mut(&self.id)
                .map(|entry| entry.task.start())
                .unwrap_or(false)
        };
        if !started {
            self.settle(
                TaskStatus::Cancelled,
                Some(Error::Cancelled(self.request.version.clone())),
            );
            return;
        }

        let converter = Arc::new(CallbackConverter::new(self.gate.clone()));
        converter.start();
        let sink: EventSink = {
            let converter = converter.clone();
            Arc::new(move |event| converter.convert(event))
        };

        let result = match self.request.kind {
            TaskKind::InstallVersion => {
                self.backend
                    .install_version(
                        &self.request.version,
                        &self.request.target_dir,
                        sink,
                        self.cancel.clone(),
                    )
                    .await
            }
            TaskKind::VerifyVersion => {
                self.backend
                    .verify_version(
                        &self.request.version,
                        &self.request.target_dir,
                        sink,
                        self.cancel.clone(),
                    )
                    .await
            }
        };

        match result {
            Ok(()) => {
                tracing::info!(task = self.id, "task succeeded");
                self.settle(TaskStatus::Succeeded, None);
            }
            Err(err) if err.is_cancelled() => {
                tracing::info!(task = self.id, "task cancelled");
                self.settle(TaskStatus::Cancelled, Some(err));
            }
            Err(err) => {
                tracing::error!(task = self.id, error = %err, "task failed");
                self.settle(TaskStatus::Failed, Some(err));
            }
        }
    }

    fn settle(&self, status: TaskStatus, err: Option<Error>) {
        {
            let mut tasks = lock_or_recover(&self.tasks);
            if let Some(entry) = tasks.get_mut(&self.id) {
                entry.task.finish(status);
            }
        }
        match err {
            None => self.gate.finished(),
            Some(err) => self.gate.error(&err),
        }
        self.done.notify_waiters();
    }
}

/// Per-task event gate: the terminal event (`finished` or `error`) passes at
/// most once, and every event after the terminal one is dropped.
struct TerminalGate {
    inner: Arc<dyn InstallEvents>,
    terminal: AtomicBool,
}

impl TerminalGate {
    fn new(inner: Arc<dyn InstallEvents>) -> Self {
        Self {
            inner,
            terminal: AtomicBool::new(false),
        }
    }
}

impl InstallEvents for TerminalGate {
    fn start(&self) {
        if !self.terminal.load(Ordering::SeqCst) {
            self.inner.start();
        }
    }

    fn status(&self, text: &str) {
        if !self.terminal.load(Ordering::SeqCst) {
            self.inner.status(text);
        }
    }

    fn progress(&self, percent: u8) {
        if !self.terminal.load(Ordering::SeqCst) {
            self.inner.progress(percent);
        }
    }

    fn size(&self, total: u64) {
        if !self.terminal.load(Ordering::SeqCst) {
            self.inner.size(total);
        }
    }

    fn finished(&self) {
        if !self.terminal.swap(true, Ordering::SeqCst) {
            self.inner.finished();
        }
    }

    fn error(&self, err: &Error) {
        if !self.terminal.swap(true, Ordering::SeqCst) {
            self.inner.error(err);
        }
    }
}
