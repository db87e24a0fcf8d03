//! Installation: the backend adapter boundary, task lifecycle, bounded
//! scheduler, and the converter that translates backend-native events into
//! the callback fabric.

pub mod backend;
pub mod converter;
pub mod scheduler;
pub mod task;

pub use backend::{BackendEvent, EventSink, InstallBackend, ManifestBackend, ManifestFile, VersionManifest};
pub use converter::CallbackConverter;
pub use scheduler::{InstallRequest, InstallScheduler, SchedulerProgress};
pub use task::{InstallTask, TaskId, TaskKind, TaskStatus};
