//! The self-describing manifest embedded in every archive.
//!
//! When the record store is gone the manifest is the only description of an
//! archive, so its JSON shape is a compatibility surface: fields may be
//! added with defaults, never renamed.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backup::types::ItemType;
use crate::error::BackupError;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: &str = "1.0";

const SCHEMA_JSON: &str = include_str!("../../schema/manifest-v1.json");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub since_date: Option<DateTime<Utc>>,
    /// Job that produced the archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub summary: ManifestSummary,
    pub items: Vec<ManifestItem>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSummary {
    pub documents: u64,
    pub versions: u64,
    pub signatures: u64,
}

impl ManifestSummary {
    pub fn total(&self) -> u64 {
        self.documents + self.versions + self.signatures
    }
}

/// One distinct file digest referenced by the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestItem {
    #[serde(rename = "type")]
    pub item_type: ItemType,
    /// Entity type of the first record that referenced the bytes.
    pub entity: String,
    pub id: String,
    pub hash: String,
    /// Archive-relative location of the bytes.
    pub path: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Location relative to the live data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// `false` when the bytes live in an earlier archive.
    #[serde(default = "default_stored")]
    pub stored: bool,
}

fn default_stored() -> bool {
    true
}

impl Manifest {
    pub fn new(
        job_id: Option<String>,
        created_by: Option<String>,
        since_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            created_at: Utc::now(),
            created_by,
            since_date,
            job_id,
            summary: ManifestSummary::default(),
            items: Vec::new(),
        }
    }

    pub fn stored_items(&self) -> impl Iterator<Item = &ManifestItem> {
        self.items.iter().filter(|item| item.stored)
    }

    pub fn find_by_hash(&self, hash: &str) -> Option<&ManifestItem> {
        self.items.iter().find(|item| item.hash == hash)
    }

    pub fn write_to(&self, path: &Path) -> Result<(), BackupError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| BackupError::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, json).map_err(|e| BackupError::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Parses and schema-checks manifest JSON. Errors are human-readable.
    pub fn parse(content: &str) -> Result<Self, Vec<String>> {
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| vec![format!("manifest is not valid JSON: {}", e)])?;

        let errors = schema_errors(&value);
        if !errors.is_empty() {
            return Err(errors);
        }

        serde_json::from_value(value).map_err(|e| vec![format!("manifest is malformed: {}", e)])
    }
}

/// Schema violations of a manifest document; empty when it conforms.
pub fn schema_errors(value: &serde_json::Value) -> Vec<String> {
    let schema: serde_json::Value = match serde_json::from_str(SCHEMA_JSON) {
        Ok(schema) => schema,
        Err(e) => return vec![format!("invalid embedded manifest schema: {}", e)],
    };
    let validator = match jsonschema::validator_for(&schema) {
        Ok(validator) => validator,
        Err(e) => return vec![format!("failed to compile manifest schema: {}", e)],
    };

    validator
        .iter_errors(value)
        .map(|e| format!("manifest schema: {}", e))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(hash_char: char, stored: bool) -> ManifestItem {
        ManifestItem {
            item_type: ItemType::File,
            entity: "documents".to_string(),
            id: "d1".to_string(),
            hash: hash_char.to_string().repeat(64),
            path: "documents/d1/a.pdf".to_string(),
            file_name: "a.pdf".to_string(),
            size: Some(3),
            source_path: Some("2026/a.pdf".to_string()),
            stored,
        }
    }

    #[test]
    fn test_write_and_parse() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        let mut manifest = Manifest::new(Some("job-1".to_string()), None, None);
        manifest.summary.documents = 1;
        manifest.items.push(item('a', true));
        manifest.items.push(item('b', false));
        manifest.write_to(&path).unwrap();

        let parsed = Manifest::parse(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, manifest);
        assert_eq!(parsed.stored_items().count(), 1);
        assert!(parsed.find_by_hash(&"b".repeat(64)).is_some());
    }

    #[test]
    fn test_wire_shape() {
        let mut manifest = Manifest::new(None, Some("admin".to_string()), None);
        manifest.items.push(item('c', true));
        let value = serde_json::to_value(&manifest).unwrap();

        assert_eq!(value["items"][0]["type"], "FILE");
        assert_eq!(value["items"][0]["fileName"], "a.pdf");
        assert_eq!(value["createdBy"], "admin");
        assert!(value["summary"]["versions"].is_u64());
        assert!(value.get("jobId").is_none());
    }

    #[test]
    fn test_stored_defaults_to_true() {
        let json = format!(
            r#"{{"version":"1.0","createdAt":"2026-01-01T00:00:00Z","createdBy":null,
            "sinceDate":null,"summary":{{"documents":1,"versions":0,"signatures":0}},
            "items":[{{"type":"FILE","entity":"documents","id":"d1","hash":"{}",
            "path":"documents/d1/a.pdf","fileName":"a.pdf"}}]}}"#,
            "e".repeat(64)
        );
        let manifest = Manifest::parse(&json).unwrap();
        assert!(manifest.items[0].stored);
        assert_eq!(manifest.items[0].size, None);
    }

    #[test]
    fn test_schema_rejects_missing_items() {
        let errors = Manifest::parse(
            r#"{"version":"1.0","createdAt":"2026-01-01T00:00:00Z",
            "summary":{"documents":0,"versions":0,"signatures":0}}"#,
        )
        .unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_schema_rejects_bad_hash() {
        let mut manifest = Manifest::new(None, None, None);
        let mut bad = item('a', true);
        bad.hash = "not-a-digest".to_string();
        manifest.items.push(bad);
        let value = serde_json::to_value(&manifest).unwrap();
        assert!(!schema_errors(&value).is_empty());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(Manifest::parse("{not json").is_err());
    }
}
