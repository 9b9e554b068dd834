//! Restore log, status and step event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a restore attempt.
///
/// `Pending → Validating → RestoringDb → RestoringFiles → Completed`, with
/// `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    Pending,
    Validating,
    RestoringDb,
    RestoringFiles,
    Completed,
    Failed,
}

impl RestoreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreStatus::Pending => "pending",
            RestoreStatus::Validating => "validating",
            RestoreStatus::RestoringDb => "restoring_db",
            RestoreStatus::RestoringFiles => "restoring_files",
            RestoreStatus::Completed => "completed",
            RestoreStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RestoreStatus::Pending),
            "validating" => Some(RestoreStatus::Validating),
            "restoring_db" => Some(RestoreStatus::RestoringDb),
            "restoring_files" => Some(RestoreStatus::RestoringFiles),
            "completed" => Some(RestoreStatus::Completed),
            "failed" => Some(RestoreStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RestoreStatus::Completed | RestoreStatus::Failed)
    }

    pub fn can_transition_to(&self, next: RestoreStatus) -> bool {
        use RestoreStatus::*;
        match (self, next) {
            (Pending, Validating)
            | (Validating, RestoringDb)
            | (RestoringDb, RestoringFiles)
            | (RestoringFiles, Completed) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for RestoreStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One restore attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreLog {
    pub id: String,
    /// Source job. `None` for an emergency restore until its job is resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_job_id: Option<String>,
    pub archive_path: String,
    pub status: RestoreStatus,
    pub total_records: u64,
    pub restored_records: u64,
    pub total_files: u64,
    pub restored_files: u64,
    pub skipped_files: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    pub emergency: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RestoreLog {
    pub fn pending(
        id: impl Into<String>,
        backup_job_id: Option<String>,
        archive_path: impl Into<String>,
        creator: Option<String>,
        emergency: bool,
    ) -> Self {
        Self {
            id: id.into(),
            backup_job_id,
            archive_path: archive_path.into(),
            status: RestoreStatus::Pending,
            total_records: 0,
            restored_records: 0,
            total_files: 0,
            restored_files: 0,
            skipped_files: 0,
            error_message: None,
            creator,
            emergency,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Which log a step event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Validation,
    Restore,
}

impl StepPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepPhase::Validation => "validation",
            StepPhase::Restore => "restore",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "validation" => Some(StepPhase::Validation),
            "restore" => Some(StepPhase::Restore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// A status transition was applied.
    Transition,
    ValidationError,
    ValidationWarning,
    RecordInserted,
    RecordUpdated,
    /// The existing row won the conflict.
    RecordKept,
    /// Not inserted because a referenced row is missing.
    OrphanSkipped,
    FileRestored,
    /// The bytes already exist somewhere in the live tree.
    FileAlreadyPresent,
    /// Deduplicated bytes whose original archive is gone.
    FileUnavailable,
    /// Different bytes already sit at the destination and were left alone.
    FileKept,
    IntegrityFailure,
    /// An emergency restore created or reused the job row.
    JobResolved,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Transition => "transition",
            StepKind::ValidationError => "validation_error",
            StepKind::ValidationWarning => "validation_warning",
            StepKind::RecordInserted => "record_inserted",
            StepKind::RecordUpdated => "record_updated",
            StepKind::RecordKept => "record_kept",
            StepKind::OrphanSkipped => "orphan_skipped",
            StepKind::FileRestored => "file_restored",
            StepKind::FileAlreadyPresent => "file_already_present",
            StepKind::FileUnavailable => "file_unavailable",
            StepKind::FileKept => "file_kept",
            StepKind::IntegrityFailure => "integrity_failure",
            StepKind::JobResolved => "job_resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        const ALL: [StepKind; 13] = [
            StepKind::Transition,
            StepKind::ValidationError,
            StepKind::ValidationWarning,
            StepKind::RecordInserted,
            StepKind::RecordUpdated,
            StepKind::RecordKept,
            StepKind::OrphanSkipped,
            StepKind::FileRestored,
            StepKind::FileAlreadyPresent,
            StepKind::FileUnavailable,
            StepKind::FileKept,
            StepKind::IntegrityFailure,
            StepKind::JobResolved,
        ];
        ALL.into_iter().find(|k| k.as_str() == s)
    }
}

/// One entry of a restore's append-only step log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEvent {
    pub phase: StepPhase,
    pub step: StepKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

impl StepEvent {
    pub fn new(phase: StepPhase, step: StepKind, detail: impl Into<String>) -> Self {
        Self {
            phase,
            step,
            entity_type: None,
            entity_id: None,
            detail: detail.into(),
            recorded_at: Utc::now(),
        }
    }

    pub fn for_entity(mut self, entity_type: &str, entity_id: &str) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id.to_string());
        self
    }
}

/// A restore log together with its step events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreDetail {
    pub log: RestoreLog,
    pub steps: Vec<StepEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use RestoreStatus::*;
        let path = [Pending, Validating, RestoringDb, RestoringFiles, Completed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_failed_reachable_from_live_states_only() {
        use RestoreStatus::*;
        for live in [Pending, Validating, RestoringDb, RestoringFiles] {
            assert!(live.can_transition_to(Failed));
        }
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn test_validation_cannot_skip_ahead() {
        assert!(!RestoreStatus::Pending.can_transition_to(RestoreStatus::RestoringDb));
        assert!(!RestoreStatus::Validating.can_transition_to(RestoreStatus::RestoringFiles));
        assert!(!RestoreStatus::Validating.can_transition_to(RestoreStatus::Completed));
    }

    #[test]
    fn test_step_kind_names_round_trip() {
        for kind in [
            StepKind::OrphanSkipped,
            StepKind::FileAlreadyPresent,
            StepKind::FileKept,
            StepKind::JobResolved,
        ] {
            assert_eq!(StepKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(StepKind::parse("unknown"), None);
        assert_eq!(
            RestoreStatus::parse("restoring_files"),
            Some(RestoreStatus::RestoringFiles)
        );
    }

    #[test]
    fn test_step_event_for_entity() {
        let event = StepEvent::new(StepPhase::Restore, StepKind::RecordInserted, "inserted")
            .for_entity("documents", "d1");
        assert_eq!(event.entity_type.as_deref(), Some("documents"));
        assert_eq!(event.entity_id.as_deref(), Some("d1"));
    }
}
