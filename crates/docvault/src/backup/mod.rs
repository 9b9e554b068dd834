//! Backup side: change selection, hashing, deduplication, packaging,
//! retention and the job orchestrator tying them together.

pub mod archive;
pub mod dedup;
pub mod hasher;
pub mod manifest;
pub mod orchestrator;
pub mod package;
pub mod retention;
pub mod selector;
pub mod types;

pub use dedup::Deduplicator;
pub use hasher::ContentHasher;
pub use manifest::{Manifest, ManifestItem};
pub use orchestrator::BackupOrchestrator;
pub use package::{PackageBuilder, PackageOutcome};
pub use retention::{RetentionManager, RetentionReport};
pub use selector::{ChangeSet, ChangeSetSelector};
pub use types::{
    BackupDetail, BackupItem, BackupJob, BackupRequest, BackupStatus, ItemType, PendingSummary,
};
