use std::sync::Arc;

use crate::config::BackupConfig;
use crate::db::Database;
use crate::lease::JobLeases;
use crate::sinks::{AuditSink, DbAuditSink, NoopNotifier, NotificationSink};

/// Collaborators shared by every backup and restore task.
#[derive(Clone)]
pub struct EngineContext {
    pub db: Database,
    pub config: Arc<BackupConfig>,
    pub leases: JobLeases,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn NotificationSink>,
}

impl EngineContext {
    /// Audits to the database and discards notifications.
    pub fn new(db: Database, config: Arc<BackupConfig>) -> Self {
        Self {
            audit: Arc::new(DbAuditSink::new(db.clone())),
            notifier: Arc::new(NoopNotifier),
            leases: JobLeases::new(),
            db,
            config,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }
}
