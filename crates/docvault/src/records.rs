//! Document-management records captured by backups.
//!
//! These are the rows the engine reads from and replays into the record
//! store. Each type is dumped as one JSON object per line, so the serde
//! representation is the archive format and must stay backwards compatible.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::sanitize;

/// Entity types that take part in a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Document,
    DocumentVersion,
    Signature,
}

impl RecordKind {
    /// All kinds in foreign-key order: parents before children.
    pub const ALL: [RecordKind; 3] = [
        RecordKind::Document,
        RecordKind::DocumentVersion,
        RecordKind::Signature,
    ];

    /// Entity type name used in dumps, manifests and backup items.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Document => "documents",
            RecordKind::DocumentVersion => "document_versions",
            RecordKind::Signature => "signatures",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "documents" => Some(RecordKind::Document),
            "document_versions" => Some(RecordKind::DocumentVersion),
            "signatures" => Some(RecordKind::Signature),
            _ => None,
        }
    }

    /// Archive-relative path of the record dump for this kind.
    pub fn dump_path(&self) -> String {
        format!("database/{}.jsonl", self.as_str())
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tables a record may point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignTable {
    User,
    Office,
    DocumentType,
    Archivador,
    Document,
}

impl ForeignTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            ForeignTable::User => "users",
            ForeignTable::Office => "offices",
            ForeignTable::DocumentType => "document_types",
            ForeignTable::Archivador => "archivadores",
            ForeignTable::Document => "documents",
        }
    }
}

/// A reference from a record to a row in another table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: ForeignTable,
    pub id: String,
    /// Structural references are required even by an emergency restore.
    /// Non-structural ones (e.g. the creating user) are only checked on the
    /// standard path.
    pub structural: bool,
}

impl ForeignKey {
    fn structural(table: ForeignTable, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            structural: true,
        }
    }

    fn advisory(table: ForeignTable, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            structural: false,
        }
    }
}

/// A binary file referenced by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRef<'a> {
    /// Location relative to the live data directory.
    pub path: &'a str,
    pub file_name: &'a str,
}

/// Common behaviour of every backed-up record type.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: RecordKind;

    fn id(&self) -> &str;

    /// Timestamp used for change detection and conflict resolution.
    fn modified_at(&self) -> DateTime<Utc>;

    fn foreign_keys(&self) -> Vec<ForeignKey>;

    fn file(&self) -> Option<FileRef<'_>> {
        None
    }

    /// Deterministic location of this record's file inside an archive.
    fn archive_path(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub archivador_id: String,
    pub document_type_id: String,
    pub office_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for Document {
    const KIND: RecordKind = RecordKind::Document;

    fn id(&self) -> &str {
        &self.id
    }

    fn modified_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn foreign_keys(&self) -> Vec<ForeignKey> {
        let mut keys = vec![
            ForeignKey::structural(ForeignTable::Archivador, &self.archivador_id),
            ForeignKey::structural(ForeignTable::DocumentType, &self.document_type_id),
            ForeignKey::structural(ForeignTable::Office, &self.office_id),
        ];
        if let Some(creator) = &self.created_by {
            keys.push(ForeignKey::advisory(ForeignTable::User, creator));
        }
        keys
    }

    fn file(&self) -> Option<FileRef<'_>> {
        file_ref(self.file_path.as_deref(), self.file_name.as_deref())
    }

    fn archive_path(&self) -> Option<String> {
        let file = self.file()?;
        Some(format!(
            "documents/{}/{}",
            sanitize::path_segment(&self.id),
            sanitize::path_segment(file.file_name)
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentVersion {
    pub id: String,
    pub document_id: String,
    pub version_number: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for DocumentVersion {
    const KIND: RecordKind = RecordKind::DocumentVersion;

    fn id(&self) -> &str {
        &self.id
    }

    fn modified_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn foreign_keys(&self) -> Vec<ForeignKey> {
        vec![ForeignKey::structural(
            ForeignTable::Document,
            &self.document_id,
        )]
    }

    fn file(&self) -> Option<FileRef<'_>> {
        file_ref(self.file_path.as_deref(), self.file_name.as_deref())
    }

    fn archive_path(&self) -> Option<String> {
        let file = self.file()?;
        Some(format!(
            "documents/versions/{}/v{}/{}",
            sanitize::path_segment(&self.document_id),
            self.version_number,
            sanitize::path_segment(file.file_name)
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub id: String,
    pub document_id: String,
    pub signer_id: String,
    pub signed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for Signature {
    const KIND: RecordKind = RecordKind::Signature;

    fn id(&self) -> &str {
        &self.id
    }

    /// A revert counts as a modification even if `updated_at` was not bumped.
    fn modified_at(&self) -> DateTime<Utc> {
        match self.reverted_at {
            Some(reverted) if reverted > self.updated_at => reverted,
            _ => self.updated_at,
        }
    }

    fn foreign_keys(&self) -> Vec<ForeignKey> {
        vec![ForeignKey::structural(
            ForeignTable::Document,
            &self.document_id,
        )]
    }
}

fn file_ref<'a>(path: Option<&'a str>, name: Option<&'a str>) -> Option<FileRef<'a>> {
    let path = path.filter(|p| !p.trim().is_empty())?;
    let file_name = name
        .filter(|n| !n.trim().is_empty())
        .or_else(|| path.rsplit('/').next())
        .unwrap_or(path);
    Some(FileRef { path, file_name })
}
