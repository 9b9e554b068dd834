//! The control surface: submits backups and restores to the worker pool and
//! answers queries about them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backup::types::{BackupDetail, BackupJob, BackupRequest, BackupStatus, PendingSummary};
use crate::backup::ChangeSetSelector;
use crate::broadcast::{BroadcastProgress, ProgressBroadcaster, ProgressEvent, TaskKind};
use crate::config::BackupConfig;
use crate::context::EngineContext;
use crate::db::backup_repo::{self, BackupJobFilter};
use crate::db::restore_repo::{self, RestoreLogFilter};
use crate::db::Database;
use crate::error::{BackupError, RestoreError, Result};
use crate::lease::LeaseGuard;
use crate::restore::types::{RestoreDetail, RestoreLog, RestoreStatus};
use crate::restore::EmergencyRestoreOrchestrator;
use crate::sinks::{AuditEvent, BroadcastNotifier, Notification};
use crate::worker::{Task, TaskResult, WorkerPool};

/// Special `database_path` that opens a private in-memory database.
pub const IN_MEMORY_DATABASE: &str = ":memory:";

pub struct BackupService {
    ctx: EngineContext,
    pool: WorkerPool,
    progress: ProgressBroadcaster,
    notifications: BroadcastNotifier,
}

impl BackupService {
    /// Opens the database named by `config` and starts the service.
    pub fn open(config: BackupConfig) -> Result<Self> {
        let db = if config.database_path == IN_MEMORY_DATABASE {
            Database::open_in_memory()?
        } else {
            Database::open(Path::new(&config.database_path))?
        };
        Self::new(EngineContext::new(db, Arc::new(config)))
    }

    /// Starts the worker pool over `ctx`.
    ///
    /// Jobs and restore logs a previous process left unfinished are marked
    /// failed first. The context's notifier is replaced by a broadcast one
    /// that [`subscribe_notifications`](Self::subscribe_notifications) reads.
    pub fn new(ctx: EngineContext) -> Result<Self> {
        let now = Utc::now();
        let jobs = backup_repo::fail_interrupted(&ctx.db, now)?;
        let logs = restore_repo::fail_interrupted(&ctx.db, now)?;
        if jobs + logs > 0 {
            warn!(
                "Marked {} backups and {} restores interrupted by a previous run as failed",
                jobs, logs
            );
        }

        let notifications = BroadcastNotifier::default();
        let ctx = ctx.with_notifier(Arc::new(notifications.clone()));
        let progress = ProgressBroadcaster::default();
        let pool = WorkerPool::new(ctx.clone(), progress.clone(), ctx.config.worker_count)?;

        info!("Backup service started");
        Ok(Self {
            ctx,
            pool,
            progress,
            notifications,
        })
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Queues a backup and returns its pending job.
    pub fn submit_backup(&self, request: BackupRequest) -> Result<BackupJob> {
        let lease = self
            .ctx
            .leases
            .try_acquire(TaskKind::Backup)
            .ok_or(BackupError::AlreadyRunning)?;

        let mut job = BackupJob::pending(Uuid::new_v4().to_string(), &request);
        backup_repo::insert_job(&self.ctx.db, &job)?;
        self.ctx.audit.record(
            AuditEvent::new(TaskKind::Backup, &job.id, "requested")
                .by(request.creator.as_deref()),
        );

        let task = Task::Backup {
            job_id: job.id.clone(),
            lease,
        };
        if let Err(e) = self.pool.submit(task) {
            job.status = BackupStatus::Failed;
            job.completed_at = Some(Utc::now());
            job.error_message = Some(e.to_string());
            backup_repo::update_job(&self.ctx.db, &job)?;
            return Err(e.into());
        }

        info!("Backup {} queued", job.id);
        Ok(job)
    }

    pub fn list_backups(&self, filter: &BackupJobFilter) -> Result<(Vec<BackupJob>, u64)> {
        Ok(backup_repo::query_jobs(&self.ctx.db, filter)?)
    }

    pub fn get_backup(&self, id: &str) -> Result<BackupDetail> {
        let job = self.find_job(id)?;
        let items = backup_repo::items_for_job(&self.ctx.db, id)?;
        Ok(BackupDetail { job, items })
    }

    /// What the next backup would capture.
    pub fn pending_summary(&self) -> Result<PendingSummary> {
        let since = backup_repo::latest_completed(&self.ctx.db)?.and_then(|j| j.completed_at);
        Ok(ChangeSetSelector::new(&self.ctx.db).pending_counts(since)?)
    }

    /// Path of a completed job's archive.
    pub fn archive_for_download(&self, id: &str) -> Result<PathBuf> {
        let job = self.find_job(id)?;
        Ok(completed_archive(&job)?)
    }

    /// Queues a restore of a completed backup and returns its pending log.
    pub fn submit_restore(&self, job_id: &str, creator: Option<&str>) -> Result<RestoreLog> {
        let lease = self.acquire_restore()?;
        let job = self.find_job(job_id)?;
        let archive = completed_archive(&job)?;

        let log = RestoreLog::pending(
            Uuid::new_v4().to_string(),
            Some(job.id.clone()),
            archive.to_string_lossy(),
            creator.map(str::to_string),
            false,
        );
        restore_repo::insert_log(&self.ctx.db, &log)?;
        self.ctx.audit.record(
            AuditEvent::new(TaskKind::Restore, &log.id, "requested")
                .by(creator)
                .with_detail(format!("restore of backup {}", job.id)),
        );

        if let Err(e) = self.pool.submit(Task::Restore {
            log_id: log.id.clone(),
            lease,
        }) {
            let mut failed = log;
            failed.status = RestoreStatus::Failed;
            failed.completed_at = Some(Utc::now());
            failed.error_message = Some(e.to_string());
            restore_repo::update_log(&self.ctx.db, &failed)?;
            return Err(e.into());
        }

        info!("Restore {} of backup {} queued", log.id, job.id);
        Ok(log)
    }

    /// Validates and restores an uploaded archive on the calling thread,
    /// holding the restore lease throughout.
    pub fn emergency_restore(
        &self,
        archive_path: &Path,
        creator: Option<&str>,
    ) -> Result<RestoreLog> {
        let _lease = self.acquire_restore()?;
        let orchestrator = EmergencyRestoreOrchestrator::new(self.ctx.clone());
        let log = orchestrator.prepare(archive_path, creator)?;
        let tracker = self.progress.start_task(&log.id, TaskKind::Restore);
        orchestrator.execute(&log.id, &BroadcastProgress::new(tracker))
    }

    pub fn list_restores(&self, filter: &RestoreLogFilter) -> Result<(Vec<RestoreLog>, u64)> {
        Ok(restore_repo::query_logs(&self.ctx.db, filter)?)
    }

    pub fn get_restore(&self, id: &str) -> Result<RestoreDetail> {
        let log = restore_repo::find_log(&self.ctx.db, id)?
            .ok_or_else(|| RestoreError::NotFound(id.to_string()))?;
        let steps = restore_repo::steps_for_log(&self.ctx.db, id, None)?;
        Ok(RestoreDetail { log, steps })
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Blocks until a worker finishes a task.
    pub fn recv_result(&self) -> Option<TaskResult> {
        self.pool.recv_result()
    }

    pub fn try_recv_result(&self) -> Option<TaskResult> {
        self.pool.try_recv_result()
    }

    /// Stops the workers and waits for them to exit.
    pub fn shutdown(self) {
        self.pool.shutdown();
        self.pool.wait();
    }

    fn acquire_restore(&self) -> Result<LeaseGuard> {
        Ok(self
            .ctx
            .leases
            .try_acquire(TaskKind::Restore)
            .ok_or(RestoreError::AlreadyRunning)?)
    }

    fn find_job(&self, id: &str) -> Result<BackupJob> {
        Ok(backup_repo::find_job(&self.ctx.db, id)?
            .ok_or_else(|| BackupError::NotFound(id.to_string()))?)
    }
}

fn completed_archive(job: &BackupJob) -> std::result::Result<PathBuf, BackupError> {
    if job.status != BackupStatus::Completed {
        return Err(BackupError::NotCompleted {
            id: job.id.clone(),
            status: job.status.as_str().to_string(),
        });
    }
    let path = PathBuf::from(job.archive_path.as_deref().unwrap_or_default());
    if !path.is_file() {
        return Err(BackupError::ArchiveMissing {
            id: job.id.clone(),
            path,
        });
    }
    Ok(path)
}
