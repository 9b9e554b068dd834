//! Builder patterns for creating test records programmatically.

#![allow(dead_code)]

use chrono::{DateTime, Utc};

use docvault::records::{Document, DocumentVersion, Signature};

/// Reference rows every harness database is seeded with.
pub const USER: &str = "u1";
pub const OFFICE: &str = "o1";
pub const DOCUMENT_TYPE: &str = "t1";
pub const ARCHIVADOR: &str = "a1";

/// Builder for `Document` rows filed under the seeded archivador.
pub struct DocumentBuilder {
    document: Document,
}

impl DocumentBuilder {
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            document: Document {
                id: id.to_string(),
                title: format!("Document {}", id),
                archivador_id: ARCHIVADOR.to_string(),
                document_type_id: DOCUMENT_TYPE.to_string(),
                office_id: OFFICE.to_string(),
                created_by: Some(USER.to_string()),
                file_path: None,
                file_name: None,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.document.title = title.to_string();
        self
    }

    /// Points the document at `relative`, a path under the data dir.
    pub fn file(mut self, relative: &str) -> Self {
        self.document.file_path = Some(relative.to_string());
        self.document.file_name = relative.rsplit('/').next().map(str::to_string);
        self
    }

    pub fn created_by(mut self, user: Option<&str>) -> Self {
        self.document.created_by = user.map(str::to_string);
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.document.created_at = at;
        self.document.updated_at = at;
        self
    }

    pub fn build(self) -> Document {
        self.document
    }
}

pub fn version(id: &str, document_id: &str, number: i64, file: Option<&str>) -> DocumentVersion {
    let now = Utc::now();
    DocumentVersion {
        id: id.to_string(),
        document_id: document_id.to_string(),
        version_number: number,
        file_path: file.map(str::to_string),
        file_name: file.and_then(|f| f.rsplit('/').next()).map(str::to_string),
        created_at: now,
        updated_at: now,
    }
}

pub fn signature(id: &str, document_id: &str) -> Signature {
    let now = Utc::now();
    Signature {
        id: id.to_string(),
        document_id: document_id.to_string(),
        signer_id: USER.to_string(),
        signed_at: now,
        reverted_at: None,
        created_at: now,
        updated_at: now,
    }
}
