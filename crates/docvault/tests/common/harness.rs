//! Test harness for isolated test execution.
//!
//! The `TestHarness` struct provides a complete isolated environment:
//! - Temporary data and backup directories
//! - An in-memory database seeded with the reference rows records point at
//! - A running `BackupService` with helpers that wait for task results

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use docvault::backup::types::{BackupItem, ItemType};
use docvault::config::BackupConfig;
use docvault::db::{backup_repo, record_repo};
use docvault::records::Document;
use docvault::service::IN_MEMORY_DATABASE;
use docvault::{BackupJob, BackupRequest, BackupService, Database, RestoreDetail};

use super::builders::{ARCHIVADOR, DOCUMENT_TYPE, OFFICE, USER};

pub struct TestHarness {
    temp_dir: TempDir,
    pub data_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub service: BackupService,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a harness whose config is adjusted by `configure` before the
    /// service starts.
    pub fn with_config<F: FnOnce(&mut BackupConfig)>(configure: F) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let data_dir = temp_dir.path().join("data");
        let backup_dir = temp_dir.path().join("backups");
        std::fs::create_dir_all(&data_dir).expect("Failed to create data dir");

        let mut config = BackupConfig::new(
            IN_MEMORY_DATABASE,
            data_dir.to_string_lossy(),
            backup_dir.to_string_lossy(),
        );
        config.worker_count = 1;
        configure(&mut config);

        let service = BackupService::open(config).expect("Failed to start service");
        let db = &service.context().db;
        record_repo::insert_user(db, USER, "Clerk").unwrap();
        record_repo::insert_office(db, OFFICE, "Office").unwrap();
        record_repo::insert_document_type(db, DOCUMENT_TYPE, "Type").unwrap();
        record_repo::insert_archivador(db, ARCHIVADOR, "Shelf", OFFICE).unwrap();

        Self {
            temp_dir,
            data_dir,
            backup_dir,
            service,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn db(&self) -> &Database {
        &self.service.context().db
    }

    /// Write `content` at `relative` under the data dir.
    pub fn write_file(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.data_dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).expect("Failed to write data file");
        path
    }

    pub fn read_file(&self, relative: &str) -> Vec<u8> {
        std::fs::read(self.data_dir.join(relative)).expect("Failed to read data file")
    }

    pub fn remove_file(&self, relative: &str) {
        std::fs::remove_file(self.data_dir.join(relative)).expect("Failed to remove data file");
    }

    pub fn insert(&self, document: &Document) {
        record_repo::insert(self.db(), document).expect("Failed to insert document");
    }

    /// Bumps a document's modification time without changing anything else.
    pub fn touch(&self, id: &str) {
        let mut document: Document = record_repo::find(self.db(), id).unwrap().unwrap();
        document.updated_at = Utc::now();
        record_repo::update(self.db(), &document).unwrap();
    }

    /// Keeps consecutive writes and job completions on distinct timestamps.
    pub fn tick(&self) {
        std::thread::sleep(Duration::from_millis(5));
    }

    /// Submit a backup and wait for the worker to finish it.
    pub fn run_backup(&self) -> BackupJob {
        let job = self
            .service
            .submit_backup(BackupRequest::default())
            .expect("Failed to submit backup");
        let result = self.service.recv_result().expect("Worker pool stopped");
        assert_eq!(result.task_id, job.id);
        assert!(result.success, "Backup failed: {:?}", result.error);
        self.service.get_backup(&job.id).unwrap().job
    }

    /// Submit a restore and wait for the worker to finish it, successful or not.
    pub fn run_restore(&self, job_id: &str) -> RestoreDetail {
        let log = self
            .service
            .submit_restore(job_id, Some("admin"))
            .expect("Failed to submit restore");
        let result = self.service.recv_result().expect("Worker pool stopped");
        assert_eq!(result.task_id, log.id);
        self.service.get_restore(&log.id).unwrap()
    }

    pub fn items(&self, job_id: &str, item_type: ItemType) -> Vec<BackupItem> {
        backup_repo::items_for_job(self.db(), job_id)
            .unwrap()
            .into_iter()
            .filter(|i| i.item_type == item_type)
            .collect()
    }

    /// Source ids of the DB_RECORD items of a job, sorted.
    pub fn record_ids(&self, job_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .items(job_id, ItemType::DbRecord)
            .into_iter()
            .map(|i| i.source_id)
            .collect();
        ids.sort();
        ids
    }

    pub fn shutdown(self) {
        self.service.shutdown();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_creates_directories() {
        let harness = TestHarness::new();
        assert!(harness.data_dir.exists());
        assert!(harness.data_dir.starts_with(harness.temp_path()));
    }

    #[test]
    fn test_write_file() {
        let harness = TestHarness::new();
        let path = harness.write_file("a/b.pdf", b"bytes");
        assert!(path.exists());
        assert_eq!(harness.read_file("a/b.pdf"), b"bytes");
    }
}
