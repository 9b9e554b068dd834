//! Shared fixtures for unit tests.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use crate::config::BackupConfig;
use crate::context::EngineContext;
use crate::db::{record_repo, Database};
use crate::records::Document;

/// An in-memory database seeded with one office, type and archivador, and
/// data/backup directories inside a temp dir.
pub struct TestEnv {
    pub temp: TempDir,
    pub ctx: EngineContext,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        let config = BackupConfig::new(
            ":memory:",
            data.to_string_lossy(),
            temp.path().join("backups").to_string_lossy(),
        );

        let db = Database::open_in_memory().unwrap();
        record_repo::insert_user(&db, "u1", "Clerk").unwrap();
        record_repo::insert_office(&db, "o1", "Office").unwrap();
        record_repo::insert_document_type(&db, "t1", "Type").unwrap();
        record_repo::insert_archivador(&db, "a1", "Shelf", "o1").unwrap();

        Self {
            ctx: EngineContext::new(db, Arc::new(config)),
            temp,
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.ctx.config.data_dir()
    }

    pub fn work_dir(&self) -> PathBuf {
        self.ctx.config.work_dir()
    }

    /// Writes `bytes` under the data dir and returns a document pointing at it.
    pub fn document_with_file(&self, id: &str, file: &str, bytes: &[u8]) -> Document {
        let path = self.data_dir().join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, bytes).unwrap();
        let mut doc = document(id, Utc::now());
        doc.file_path = Some(file.to_string());
        doc.file_name = Some(file.rsplit('/').next().unwrap_or(file).to_string());
        doc
    }
}

pub fn document(id: &str, at: DateTime<Utc>) -> Document {
    Document {
        id: id.to_string(),
        title: format!("Document {}", id),
        archivador_id: "a1".to_string(),
        document_type_id: "t1".to_string(),
        office_id: "o1".to_string(),
        created_by: Some("u1".to_string()),
        file_path: None,
        file_name: None,
        created_at: at,
        updated_at: at,
    }
}
