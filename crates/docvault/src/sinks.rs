//! Outbound event sinks: the audit trail and privileged-user notifications.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::broadcast::TaskKind;
use crate::db::{audit_repo, Database};

/// One audit entry: a state transition or a terminal outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub kind: TaskKind,
    pub subject_id: String,
    pub action: String,
    pub actor: Option<String>,
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(kind: TaskKind, subject_id: &str, action: impl Into<String>) -> Self {
        Self {
            kind,
            subject_id: subject_id.to_string(),
            action: action.into(),
            actor: None,
            detail: None,
        }
    }

    pub fn by(mut self, actor: Option<&str>) -> Self {
        self.actor = actor.map(str::to_string);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Append-only audit trail. Recording never fails the task being audited.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events to the `audit_log` table.
pub struct DbAuditSink {
    db: Database,
}

impl DbAuditSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl AuditSink for DbAuditSink {
    fn record(&self, event: AuditEvent) {
        let subject_type = match event.kind {
            TaskKind::Backup => "backup_job",
            TaskKind::Restore => "restore_log",
        };
        let entry = audit_repo::AuditEntry {
            action: event.action,
            subject_type: subject_type.to_string(),
            subject_id: event.subject_id,
            actor: event.actor,
            detail: event.detail,
            recorded_at: Utc::now(),
        };
        if let Err(e) = audit_repo::append(&self.db, &entry) {
            log::warn!("Failed to write audit entry: {}", e);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Failed,
}

/// Terminal outcome of a task, for privileged users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: TaskKind,
    pub task_id: String,
    pub outcome: Outcome,
    pub message: String,
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Publishes notifications on a broadcast channel.
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: Arc<broadcast::Sender<Notification>>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl NotificationSink for BroadcastNotifier {
    fn notify(&self, notification: Notification) {
        let _ = self.sender.send(notification);
    }
}

pub struct NoopNotifier;

impl NotificationSink for NoopNotifier {
    fn notify(&self, _notification: Notification) {}
}
