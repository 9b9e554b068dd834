//! Builds the archive for one backup run.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::backup::archive;
use crate::backup::dedup::Deduplicator;
use crate::backup::hasher::ContentHasher;
use crate::backup::manifest::{Manifest, ManifestItem, MANIFEST_FILE};
use crate::backup::selector::ChangeSet;
use crate::backup::types::{BackupItem, ItemType};
use crate::broadcast::{Counters, Phase, ProgressReporter};
use crate::error::BackupError;
use crate::records::{FileRef, Record};
use crate::sanitize;
use crate::storage::{filesystem, FileStorage};

/// Everything a finished package produced.
#[derive(Debug)]
pub struct PackageOutcome {
    pub items: Vec<BackupItem>,
    pub manifest: Manifest,
    pub archive_size: u64,
    pub record_count: u64,
    /// Distinct digests physically stored in this archive.
    pub file_count: u64,
    /// Referenced files that were missing or unreadable.
    pub unreadable_files: u64,
}

/// Identity of the run being packaged.
#[derive(Debug, Clone)]
pub struct PackageRequest<'a> {
    pub job_id: &'a str,
    pub created_by: Option<&'a str>,
    pub work_dir: &'a Path,
    pub archive_path: &'a Path,
}

pub struct PackageBuilder {
    hasher: ContentHasher,
    data: FileStorage,
    compression_level: i64,
}

/// Mutable state of one packaging run.
struct Packaging<'a> {
    work_dir: &'a Path,
    dedup: &'a mut Deduplicator,
    progress: &'a dyn ProgressReporter,
    items: Vec<BackupItem>,
    manifest: Manifest,
    listed: HashSet<String>,
    unreadable: u64,
    counters: Counters,
}

impl PackageBuilder {
    pub fn new(hasher: ContentHasher, data_dir: &Path, compression_level: i64) -> Self {
        Self {
            hasher,
            data: FileStorage::new(data_dir),
            compression_level,
        }
    }

    /// Dumps the change set, copies the bytes the deduplicator asks for,
    /// writes the manifest and compresses the work directory.
    pub fn build(
        &self,
        request: &PackageRequest<'_>,
        changes: &ChangeSet,
        dedup: &mut Deduplicator,
        progress: &dyn ProgressReporter,
    ) -> Result<PackageOutcome, BackupError> {
        let mut manifest = Manifest::new(
            Some(request.job_id.to_string()),
            request.created_by.map(str::to_string),
            changes.since,
        );
        manifest.summary.documents = changes.documents.len() as u64;
        manifest.summary.versions = changes.versions.len() as u64;
        manifest.summary.signatures = changes.signatures.len() as u64;

        write_dump(request.work_dir, &changes.documents)?;
        write_dump(request.work_dir, &changes.versions)?;
        write_dump(request.work_dir, &changes.signatures)?;

        let mut state = Packaging {
            work_dir: request.work_dir,
            dedup,
            progress,
            items: Vec::with_capacity(changes.record_count()),
            manifest,
            listed: HashSet::new(),
            unreadable: 0,
            counters: Counters {
                total_records: changes.record_count() as u64,
                ..Default::default()
            },
        };

        self.capture(&mut state, &changes.documents)?;
        self.capture(&mut state, &changes.versions)?;
        self.capture(&mut state, &changes.signatures)?;

        let manifest_path = request.work_dir.join(MANIFEST_FILE);
        state.manifest.write_to(&manifest_path)?;

        state
            .progress
            .phase(Phase::Archiving, "Compressing package...");
        let archive_size = archive::create_archive(
            request.work_dir,
            request.archive_path,
            self.compression_level,
        )?;

        let record_count = state
            .items
            .iter()
            .filter(|i| i.item_type == ItemType::DbRecord)
            .count() as u64;
        let file_count = state
            .items
            .iter()
            .filter(|i| i.item_type == ItemType::File)
            .count() as u64;

        Ok(PackageOutcome {
            items: state.items,
            manifest: state.manifest,
            archive_size,
            record_count,
            file_count,
            unreadable_files: state.unreadable,
        })
    }

    fn capture<R: Record>(
        &self,
        state: &mut Packaging<'_>,
        records: &[R],
    ) -> Result<(), BackupError> {
        for record in records {
            let digest = match record.file() {
                Some(file) => self.capture_file(state, record, file)?,
                None => None,
            };

            state.items.push(BackupItem {
                item_type: ItemType::DbRecord,
                entity_type: R::KIND.as_str().to_string(),
                source_id: record.id().to_string(),
                content_hash: digest,
                archive_relative_path: None,
                metadata: serde_json::json!({
                    "dump": R::KIND.dump_path(),
                    "modifiedAt": record.modified_at(),
                }),
            });

            state.counters.done_records += 1;
            state.progress.counters(Phase::Packaging, state.counters);
        }
        Ok(())
    }

    /// Hashes a record's file and stores its bytes when needed. Returns the
    /// digest, or `None` when the file could not be read.
    fn capture_file<R: Record>(
        &self,
        state: &mut Packaging<'_>,
        record: &R,
        file: FileRef<'_>,
    ) -> Result<Option<String>, BackupError> {
        let source = match self.data.resolve(file.path) {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping file of {} {}: {}", R::KIND, record.id(), e);
                state.unreadable += 1;
                return Ok(None);
            }
        };

        let (digest, size) = match self.hasher.hash_file(&source) {
            Ok(hashed) => hashed,
            Err(e) => {
                warn!("Skipping file of {} {}: {}", R::KIND, record.id(), e);
                state.unreadable += 1;
                return Ok(None);
            }
        };

        if state.listed.contains(&digest) {
            return Ok(Some(digest));
        }

        let archive_relative = record.archive_path().unwrap_or_else(|| {
            format!(
                "documents/{}/{}",
                digest,
                sanitize::path_segment(file.file_name)
            )
        });
        let stored = state.dedup.must_copy(&digest);

        if stored {
            let target = sanitize::safe_join(state.work_dir, &archive_relative)
                .map_err(|e| archive_error(state.work_dir, e.to_string()))?;
            filesystem::copy_file(&source, &target)
                .map_err(|e| archive_error(&target, e.to_string()))?;

            // The live file may change between hashing and copying.
            let (copied, _) = self
                .hasher
                .hash_file(&target)
                .map_err(|e| archive_error(&target, e.to_string()))?;
            if copied != digest {
                warn!(
                    "File of {} {} changed while being copied, skipping",
                    R::KIND,
                    record.id()
                );
                filesystem::remove_file(&target)
                    .map_err(|e| archive_error(&target, e.to_string()))?;
                state.unreadable += 1;
                return Ok(None);
            }

            state.dedup.mark_copied(&digest);
            state.items.push(BackupItem {
                item_type: ItemType::File,
                entity_type: R::KIND.as_str().to_string(),
                source_id: record.id().to_string(),
                content_hash: Some(digest.clone()),
                archive_relative_path: Some(archive_relative.clone()),
                metadata: serde_json::json!({
                    "size": size,
                    "fileName": file.file_name,
                    "sourcePath": file.path,
                }),
            });
            state.counters.done_files += 1;
            debug!("Stored {} ({} bytes)", sanitize::redact_path(&target), size);
        } else {
            state.counters.skipped_files += 1;
        }

        state.listed.insert(digest.clone());
        state.manifest.items.push(ManifestItem {
            item_type: ItemType::File,
            entity: R::KIND.as_str().to_string(),
            id: record.id().to_string(),
            hash: digest.clone(),
            path: archive_relative,
            file_name: file.file_name.to_string(),
            size: Some(size),
            source_path: Some(file.path.to_string()),
            stored,
        });
        state.counters.total_files += 1;

        Ok(Some(digest))
    }
}

fn archive_error(path: &Path, reason: String) -> BackupError {
    BackupError::Archive {
        path: path.to_path_buf(),
        reason,
    }
}

/// Writes one JSON object per line for every record of a kind.
fn write_dump<R: Record>(work_dir: &Path, records: &[R]) -> Result<PathBuf, BackupError> {
    let path = work_dir.join(R::KIND.dump_path());
    let dump_err = |reason: String| BackupError::RecordDump {
        path: path.clone(),
        reason,
    };

    if let Some(parent) = path.parent() {
        filesystem::ensure_directory(parent).map_err(|e| dump_err(e.to_string()))?;
    }

    let file = File::create(&path).map_err(|e| dump_err(e.to_string()))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record).map_err(|e| dump_err(e.to_string()))?;
        writer.write_all(b"\n").map_err(|e| dump_err(e.to_string()))?;
    }
    writer.flush().map_err(|e| dump_err(e.to_string()))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::manifest::MANIFEST_VERSION;
    use crate::broadcast::NoopProgress;
    use crate::records::{Document, Signature};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        data: PathBuf,
        work: PathBuf,
        archive: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        let work = temp.path().join("work");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::create_dir_all(&work).unwrap();
        let archive = temp.path().join("backups/job.zip");
        Fixture {
            _temp: temp,
            data,
            work,
            archive,
        }
    }

    fn document(id: &str, file: Option<&str>) -> Document {
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        Document {
            id: id.to_string(),
            title: id.to_string(),
            archivador_id: "a1".to_string(),
            document_type_id: "t1".to_string(),
            office_id: "o1".to_string(),
            created_by: None,
            file_path: file.map(str::to_string),
            file_name: file.map(|f| f.rsplit('/').next().unwrap_or(f).to_string()),
            created_at: at,
            updated_at: at,
        }
    }

    fn build(fx: &Fixture, changes: &ChangeSet, dedup: &mut Deduplicator) -> PackageOutcome {
        let builder = PackageBuilder::new(ContentHasher::default(), &fx.data, 9);
        let request = PackageRequest {
            job_id: "job-1",
            created_by: Some("admin"),
            work_dir: &fx.work,
            archive_path: &fx.archive,
        };
        builder.build(&request, changes, dedup, &NoopProgress).unwrap()
    }

    #[test]
    fn test_shared_bytes_stored_once() {
        let fx = fixture();
        std::fs::write(fx.data.join("a.pdf"), b"same bytes").unwrap();
        std::fs::write(fx.data.join("b.pdf"), b"same bytes").unwrap();
        std::fs::write(fx.data.join("c.pdf"), b"other bytes").unwrap();
        let changes = ChangeSet {
            documents: vec![
                document("A", Some("a.pdf")),
                document("B", Some("b.pdf")),
                document("C", Some("c.pdf")),
            ],
            ..Default::default()
        };

        let outcome = build(&fx, &changes, &mut Deduplicator::default());

        assert_eq!(outcome.record_count, 3);
        assert_eq!(outcome.file_count, 2);
        assert_eq!(outcome.manifest.items.len(), 2);
        assert_eq!(outcome.manifest.summary.documents, 3);
        assert_eq!(outcome.manifest.version, MANIFEST_VERSION);
        assert!(outcome.archive_size > 0);
        assert!(fx.archive.exists());

        let records: Vec<&BackupItem> = outcome
            .items
            .iter()
            .filter(|i| i.item_type == ItemType::DbRecord)
            .collect();
        assert_eq!(records[0].content_hash, records[1].content_hash);
        assert_ne!(records[0].content_hash, records[2].content_hash);
        assert!(fx.work.join("documents/A/a.pdf").exists());
        assert!(!fx.work.join("documents/B/b.pdf").exists());
    }

    #[test]
    fn test_previous_digest_not_stored_again() {
        let fx = fixture();
        std::fs::write(fx.data.join("a.pdf"), b"unchanged").unwrap();
        let (digest, _) = ContentHasher::default()
            .hash_file(&fx.data.join("a.pdf"))
            .unwrap();
        let changes = ChangeSet {
            documents: vec![document("A", Some("a.pdf"))],
            ..Default::default()
        };

        let mut dedup = Deduplicator::new(HashSet::from([digest.clone()]));
        let outcome = build(&fx, &changes, &mut dedup);

        assert_eq!(outcome.file_count, 0);
        assert_eq!(outcome.record_count, 1);
        assert_eq!(outcome.manifest.items.len(), 1);
        assert!(!outcome.manifest.items[0].stored);
        assert_eq!(outcome.items[0].content_hash.as_deref(), Some(digest.as_str()));
    }

    #[test]
    fn test_unreadable_file_is_not_fatal() {
        let fx = fixture();
        let changes = ChangeSet {
            documents: vec![document("A", Some("missing.pdf")), document("B", None)],
            ..Default::default()
        };

        let outcome = build(&fx, &changes, &mut Deduplicator::default());

        assert_eq!(outcome.unreadable_files, 1);
        assert_eq!(outcome.record_count, 2);
        assert_eq!(outcome.file_count, 0);
        assert!(outcome.items.iter().all(|i| i.content_hash.is_none()));
    }

    #[test]
    fn test_dumps_are_jsonl() {
        let fx = fixture();
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        let changes = ChangeSet {
            documents: vec![document("A", None), document("B", None)],
            signatures: vec![Signature {
                id: "s1".to_string(),
                document_id: "A".to_string(),
                signer_id: "u1".to_string(),
                signed_at: at,
                reverted_at: None,
                created_at: at,
                updated_at: at,
            }],
            ..Default::default()
        };

        build(&fx, &changes, &mut Deduplicator::default());

        let documents = std::fs::read_to_string(fx.work.join("database/documents.jsonl")).unwrap();
        assert_eq!(documents.lines().count(), 2);
        let first: Document = serde_json::from_str(documents.lines().next().unwrap()).unwrap();
        assert_eq!(first.id, "A");
        let versions =
            std::fs::read_to_string(fx.work.join("database/document_versions.jsonl")).unwrap();
        assert!(versions.is_empty());
    }

    #[test]
    fn test_path_escape_counts_as_unreadable() {
        let fx = fixture();
        let changes = ChangeSet {
            documents: vec![document("A", Some("../outside.pdf"))],
            ..Default::default()
        };

        let outcome = build(&fx, &changes, &mut Deduplicator::default());
        assert_eq!(outcome.unreadable_files, 1);
    }
}
