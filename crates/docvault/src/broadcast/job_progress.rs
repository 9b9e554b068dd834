//! Task progress broadcaster for real-time backup/restore status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Backup,
    Restore,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Backup => "backup",
            TaskKind::Restore => "restore",
        }
    }
}

/// Phase of a backup or restore task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Queued,
    Selecting,
    Packaging,
    Archiving,
    Retention,
    Validating,
    RestoringDb,
    RestoringFiles,
    Completed,
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Queued => write!(f, "Queued"),
            Phase::Selecting => write!(f, "Selecting changes"),
            Phase::Packaging => write!(f, "Packaging"),
            Phase::Archiving => write!(f, "Compressing archive"),
            Phase::Retention => write!(f, "Applying retention"),
            Phase::Validating => write!(f, "Validating package"),
            Phase::RestoringDb => write!(f, "Restoring records"),
            Phase::RestoringFiles => write!(f, "Restoring files"),
            Phase::Completed => write!(f, "Completed"),
            Phase::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress counters carried by every event. Their meaning follows the task
/// kind: captured for a backup, applied for a restore.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    pub total_records: u64,
    pub done_records: u64,
    pub total_files: u64,
    pub done_files: u64,
    pub skipped_files: u64,
}

/// Progress event for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Backup job id or restore log id.
    pub task_id: String,
    pub kind: TaskKind,
    pub phase: Phase,
    pub message: String,
    pub counters: Counters,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn new(task_id: &str, kind: TaskKind, phase: Phase, message: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            kind,
            phase,
            message: message.to_string(),
            counters: Counters::default(),
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn failed(task_id: &str, kind: TaskKind, error: &str) -> Self {
        let mut event = Self::new(task_id, kind, Phase::Failed, "Task failed");
        event.error = Some(error.to_string());
        event
    }
}

/// Broadcasts task progress events for streaming.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    sender: Arc<broadcast::Sender<ProgressEvent>>,
}

impl ProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: ProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker for a task and announces it as queued.
    pub fn start_task(&self, task_id: &str, kind: TaskKind) -> ProgressTracker {
        let tracker = ProgressTracker::new(task_id, kind, Arc::clone(&self.sender));
        tracker.update_phase(Phase::Queued, "Task queued");
        tracker
    }

    pub fn sender(&self) -> Arc<broadcast::Sender<ProgressEvent>> {
        Arc::clone(&self.sender)
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Tracks progress for a single task.
pub struct ProgressTracker {
    task_id: String,
    kind: TaskKind,
    sender: Arc<broadcast::Sender<ProgressEvent>>,
}

impl ProgressTracker {
    pub fn new(
        task_id: &str,
        kind: TaskKind,
        sender: Arc<broadcast::Sender<ProgressEvent>>,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            kind,
            sender,
        }
    }

    pub fn update_phase(&self, phase: Phase, message: &str) {
        let event = ProgressEvent::new(&self.task_id, self.kind, phase, message);
        let _ = self.sender.send(event);
    }

    pub fn update_counters(&self, phase: Phase, counters: Counters) {
        let mut event = ProgressEvent::new(&self.task_id, self.kind, phase, "Progress");
        event.counters = counters;
        let _ = self.sender.send(event);
    }

    pub fn completed(&self, message: &str, counters: Counters) {
        let mut event = ProgressEvent::new(&self.task_id, self.kind, Phase::Completed, message);
        event.counters = counters;
        let _ = self.sender.send(event);
    }

    pub fn failed(&self, error: &str) {
        let event = ProgressEvent::failed(&self.task_id, self.kind, error);
        let _ = self.sender.send(event);
    }
}
