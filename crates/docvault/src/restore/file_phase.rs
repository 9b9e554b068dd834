//! Puts archived file bytes back into the live data directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::backup::archive;
use crate::backup::hasher::ContentHasher;
use crate::backup::manifest::{Manifest, ManifestItem};
use crate::db::{backup_repo, record_repo, Database};
use crate::error::{RestoreError, Result};
use crate::restore::journal::Journal;
use crate::restore::types::{StepEvent, StepKind, StepPhase};
use crate::sanitize;
use crate::storage::filesystem;
use crate::storage::FileStorage;

pub struct FileRestorer<'a> {
    db: &'a Database,
    hasher: &'a ContentHasher,
    data: FileStorage,
}

/// Where the bytes of one manifest item come from.
enum Source {
    Package(PathBuf),
    EarlierArchive { archive: PathBuf, entry: String },
    Unavailable(String),
}

impl<'a> FileRestorer<'a> {
    pub fn new(db: &'a Database, hasher: &'a ContentHasher, data_dir: &Path) -> Self {
        Self {
            db,
            hasher,
            data: FileStorage::new(data_dir),
        }
    }

    /// Digests of every file currently referenced by a live record.
    /// Unreadable files are left out, so their bytes get restored.
    pub fn live_digests(&self) -> Result<HashSet<String>> {
        let mut digests = HashSet::new();
        for relative in record_repo::all_file_paths(self.db)? {
            let Ok(path) = self.data.resolve(&relative) else {
                continue;
            };
            if let Ok((digest, _)) = self.hasher.hash_file(&path) {
                digests.insert(digest);
            }
        }
        Ok(digests)
    }

    /// Restores every FILE item of `manifest`. A copy that does not hash to
    /// its digest is deleted and aborts the phase. An existing file at the
    /// destination is never overwritten.
    pub fn restore(
        &self,
        extracted: &Path,
        manifest: &Manifest,
        journal: &mut Journal<'_>,
    ) -> Result<()> {
        let mut live = self.live_digests()?;

        for item in &manifest.items {
            if live.contains(&item.hash) {
                journal.log.skipped_files += 1;
                journal.save()?;
                journal.step(step(item, StepKind::FileAlreadyPresent, "bytes already live"))?;
                continue;
            }

            let relative = item.source_path.as_deref().unwrap_or(&item.path);
            let dest = self.data.resolve(relative)?;

            if dest.exists() {
                let (kind, detail) = match self.hasher.hash_file(&dest) {
                    Ok((digest, _)) if digest == item.hash => (
                        StepKind::FileAlreadyPresent,
                        "bytes already at destination".to_string(),
                    ),
                    Ok((digest, _)) => (
                        StepKind::FileKept,
                        format!("{} holds different bytes ({})", relative, digest),
                    ),
                    Err(e) => (StepKind::FileKept, format!("{} is unreadable: {}", relative, e)),
                };
                if kind == StepKind::FileKept {
                    warn!("Not overwriting {}: {}", relative, detail);
                } else {
                    live.insert(item.hash.clone());
                }
                journal.log.skipped_files += 1;
                journal.save()?;
                journal.step(step(item, kind, &detail))?;
                continue;
            }

            match self.source_of(extracted, item)? {
                Source::Package(path) => {
                    filesystem::copy_file(&path, &dest)?;
                }
                Source::EarlierArchive { archive, entry } => {
                    archive::extract_entry(&archive, &entry, &dest)?;
                }
                Source::Unavailable(reason) => {
                    warn!("File {} unavailable: {}", item.path, reason);
                    journal.log.skipped_files += 1;
                    journal.save()?;
                    journal.step(step(item, StepKind::FileUnavailable, &reason))?;
                    continue;
                }
            }

            if let Err(e) = self.verify(item, &dest) {
                journal.step(step(item, StepKind::IntegrityFailure, &e.to_string()))?;
                return Err(e);
            }

            live.insert(item.hash.clone());
            journal.log.restored_files += 1;
            journal.save()?;
            journal.step(step(item, StepKind::FileRestored, relative))?;
        }

        info!(
            "File phase done: {} restored, {} skipped",
            journal.log.restored_files, journal.log.skipped_files
        );
        Ok(())
    }

    fn source_of(&self, extracted: &Path, item: &ManifestItem) -> Result<Source> {
        if item.stored {
            return Ok(Source::Package(sanitize::safe_join(extracted, &item.path)?));
        }

        match backup_repo::find_stored_file(self.db, &item.hash)? {
            Some(location) if location.archive_path.is_file() => Ok(Source::EarlierArchive {
                archive: location.archive_path,
                entry: location.entry,
            }),
            Some(location) => Ok(Source::Unavailable(format!(
                "archive of backup {} is gone",
                location.job_id
            ))),
            None => Ok(Source::Unavailable(
                "no retained backup stores these bytes".to_string(),
            )),
        }
    }

    /// Re-hashes a restored copy and removes it on mismatch.
    fn verify(&self, item: &ManifestItem, dest: &Path) -> Result<()> {
        let actual = match self.hasher.hash_file(dest) {
            Ok((digest, _)) => digest,
            Err(e) => {
                if let Err(remove) = filesystem::remove_file(dest) {
                    warn!("Could not remove unreadable copy: {}", remove);
                }
                return Err(e.into());
            }
        };
        if actual != item.hash {
            if let Err(e) = filesystem::remove_file(dest) {
                warn!("Could not remove corrupted copy: {}", e);
            }
            return Err(RestoreError::Integrity {
                path: dest.to_path_buf(),
                expected: item.hash.clone(),
                actual,
            }
            .into());
        }
        Ok(())
    }
}

fn step(item: &ManifestItem, kind: StepKind, detail: &str) -> StepEvent {
    StepEvent::new(StepPhase::Restore, kind, detail).for_entity(&item.entity, &item.id)
}
