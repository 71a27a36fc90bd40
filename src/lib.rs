pub mod batcher;
pub mod config;
mod error;
pub mod events;
pub mod message;
pub mod mirror;
pub mod reconciler;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod source;
pub mod test_infrastructure;
pub mod vcs;

pub use batcher::{ChangeBatcher, PendingAction};
pub use config::{SyncConfig, Target, TargetKind};
pub use error::{Result, SyncError};
pub use events::{EventMask, RawEvent, WatchHandle};
pub use message::{CommitMessageSource, GeneratedMessages, OpenAiGenerator, TemplateMessages};
pub use mirror::BackupMirror;
pub use reconciler::ConfigReconciler;
pub use registry::{BasePath, WatchRegistry};
pub use scheduler::{CommitScheduler, PushState};
pub use service::SynchronizerService;
pub use source::{NotificationSource, NotifySource};
pub use vcs::{CommandRunner, DryRunRunner, GitRepository, ProcessRunner};
