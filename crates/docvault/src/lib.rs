//! Incremental, content-addressed backup and restore for a document store.
//!
//! Backups capture records changed since the last completed run together
//! with file bytes not already held by that run, in a zip package with a
//! manifest. Restores validate the package, replay records with a conflict
//! strategy and put missing files back, logging every step.

pub mod backup;
pub mod broadcast;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod lease;
pub mod logging;
pub mod records;
pub mod restore;
pub mod sanitize;
pub mod service;
pub mod sinks;
pub mod storage;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use backup::{BackupDetail, BackupJob, BackupRequest, BackupStatus, PendingSummary};
pub use broadcast::{ProgressBroadcaster, ProgressEvent, TaskKind};
pub use config::{load_config, BackupConfig};
pub use context::EngineContext;
pub use db::backup_repo::BackupJobFilter;
pub use db::restore_repo::RestoreLogFilter;
pub use db::Database;
pub use error::{
    BackupError, ConfigError, DocvaultError, RestoreError, Result, StorageError, WorkerError,
};
pub use restore::{ConflictStrategy, LastWriteWins, RestoreDetail, RestoreLog, RestoreStatus};
pub use service::BackupService;
pub use sinks::{AuditSink, Notification, NotificationSink, Outcome};
