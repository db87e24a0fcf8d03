//! Installation task lifecycle
//!
//! A task is one installation-level unit of work. Its status machine is
//! Pending -> Running -> {Succeeded, Failed, Cancelled}; the terminal state
//! latches exactly once and the kind never changes after creation.

use chrono::{DateTime, Utc};

/// Scheduler-assigned task identifier
pub type TaskId = u64;

/// What a task does when dispatched
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    /// Resolve a version's file list and download it into the target dir
    InstallVersion,
    /// Hash an installed version's files against its manifest
    VerifyVersion,
}

/// Task lifecycle states
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TaskStatus {
    /// Submitted, waiting for a scheduler slot
    #[default]
    Pending,
    /// Dispatched and driving the backend
    Running,
    /// Backend completed with no error
    Succeeded,
    /// Backend reported an error
    Failed,
    /// Cancelled before or during execution
    Cancelled,
}

impl TaskStatus {
    /// True for Succeeded, Failed, and Cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// One installation-level unit of work, owned by the scheduler.
#[derive(Clone, Debug)]
pub struct InstallTask {
    /// Scheduler-assigned identifier
    pub id: TaskId,
    /// Operation this task performs; fixed at creation
    pub kind: TaskKind,
    /// Version the task operates on
    pub version: String,
    /// Current lifecycle state
    pub status: TaskStatus,
    /// Submission timestamp
    pub created_at: DateTime<Utc>,
}

impl InstallTask {
    /// Fresh pending task.
    pub fn new(id: TaskId, kind: TaskKind, version: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            version: version.into(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Pending -> Running on scheduler dispatch. Returns false (and logs)
    /// when the task is not pending, e.g. already cancelled.
    pub fn start(&mut self) -> bool {
        if self.status != TaskStatus::Pending {
            tracing::warn!(task = self.id, status = ?self.status, "cannot start non-pending task");
            return false;
        }
        self.status = TaskStatus::Running;
        true
    }

    /// Latch a terminal state exactly once.
    ///
    /// Duplicate terminal transitions are logged and dropped; non-terminal
    /// arguments are rejected the same way. Returns whether the transition
    /// was applied.
    pub fn finish(&mut self, terminal: TaskStatus) -> bool {
        if !terminal.is_terminal() {
            tracing::warn!(task = self.id, status = ?terminal, "finish requires a terminal status");
            return false;
        }
        if self.status.is_terminal() {
            tracing::warn!(
                task = self.id,
                current = ?self.status,
                attempted = ?terminal,
                "duplicate terminal transition dropped"
            );
            return false;
        }
        self.status = terminal;
        true
    }
}
