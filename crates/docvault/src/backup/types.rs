//! Backup job and item types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a backup job: `Pending → Running → Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Running => "running",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BackupStatus::Pending),
            "running" => Some(BackupStatus::Running),
            "completed" => Some(BackupStatus::Completed),
            "failed" => Some(BackupStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BackupStatus::Completed | BackupStatus::Failed)
    }

    /// Terminal states are final; `Failed` is reachable from any live state.
    pub fn can_transition_to(&self, next: BackupStatus) -> bool {
        matches!(
            (self, next),
            (BackupStatus::Pending, BackupStatus::Running)
                | (BackupStatus::Pending, BackupStatus::Failed)
                | (BackupStatus::Running, BackupStatus::Completed)
                | (BackupStatus::Running, BackupStatus::Failed)
        )
    }
}

impl std::fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backup run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupJob {
    pub id: String,
    pub status: BackupStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Reference timestamp of an incremental run; `None` for a full backup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since_date: Option<DateTime<Utc>>,
    /// Size of the produced archive in bytes.
    pub total_size: u64,
    pub record_count: u64,
    pub file_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester_user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl BackupJob {
    /// Creates a job in `Pending` state.
    pub fn pending(id: impl Into<String>, request: &BackupRequest) -> Self {
        Self {
            id: id.into(),
            status: BackupStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            since_date: None,
            total_size: 0,
            record_count: 0,
            file_count: 0,
            archive_path: None,
            manifest_path: None,
            creator: request.creator.clone(),
            requester_ip: request.requester_ip.clone(),
            requester_user_agent: request.requester_user_agent.clone(),
            error_message: None,
        }
    }
}

/// Who asked for a backup, kept for the audit trail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRequest {
    pub creator: Option<String>,
    pub requester_ip: Option<String>,
    pub requester_user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
    DbRecord,
    File,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::DbRecord => "db_record",
            ItemType::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "db_record" => Some(ItemType::DbRecord),
            "file" => Some(ItemType::File),
            _ => None,
        }
    }
}

/// One entity captured by a job. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupItem {
    pub item_type: ItemType,
    pub entity_type: String,
    pub source_id: String,
    /// File digest. Set on every FILE item and on DB_RECORD items whose
    /// record references a readable file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_relative_path: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A job together with the items it captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDetail {
    pub job: BackupJob,
    pub items: Vec<BackupItem>,
}

/// Records not yet captured by any completed backup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSummary {
    /// Reference timestamp the counts are relative to; `None` means no
    /// backup has completed yet and everything is pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    pub documents: u64,
    pub versions: u64,
    pub signatures: u64,
}

impl PendingSummary {
    pub fn total(&self) -> u64 {
        self.documents + self.versions + self.signatures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            BackupStatus::Pending,
            BackupStatus::Running,
            BackupStatus::Completed,
            BackupStatus::Failed,
        ] {
            assert_eq!(BackupStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BackupStatus::parse("superseded"), None);
    }

    #[test]
    fn test_terminal_states_are_final() {
        assert!(BackupStatus::Pending.can_transition_to(BackupStatus::Running));
        assert!(BackupStatus::Running.can_transition_to(BackupStatus::Completed));
        assert!(BackupStatus::Running.can_transition_to(BackupStatus::Failed));
        assert!(!BackupStatus::Pending.can_transition_to(BackupStatus::Completed));
        assert!(!BackupStatus::Completed.can_transition_to(BackupStatus::Failed));
        assert!(!BackupStatus::Failed.can_transition_to(BackupStatus::Running));
    }

    #[test]
    fn test_item_type_serializes_upper_case() {
        let json = serde_json::to_string(&ItemType::DbRecord).unwrap();
        assert_eq!(json, "\"DB_RECORD\"");
        assert_eq!(ItemType::parse(ItemType::File.as_str()), Some(ItemType::File));
    }
}
