use chrono::{DateTime, Utc};

use crate::broadcast::TaskKind;
use crate::lease::LeaseGuard;

/// Work queued on the pool. Each task carries the lease of its kind, which
/// is released when the task is dropped after running.
#[derive(Debug)]
pub enum Task {
    Backup { job_id: String, lease: LeaseGuard },
    Restore { log_id: String, lease: LeaseGuard },
}

impl Task {
    pub fn id(&self) -> &str {
        match self {
            Task::Backup { job_id, .. } => job_id,
            Task::Restore { log_id, .. } => log_id,
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Task::Backup { .. } => TaskKind::Backup,
            Task::Restore { .. } => TaskKind::Restore,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: String,
    pub kind: TaskKind,
    pub success: bool,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn success(task_id: &str, kind: TaskKind) -> Self {
        Self {
            task_id: task_id.to_string(),
            kind,
            success: true,
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failure(task_id: &str, kind: TaskKind, error: String) -> Self {
        Self {
            task_id: task_id.to_string(),
            kind,
            success: false,
            error: Some(error),
            finished_at: Utc::now(),
        }
    }
}
