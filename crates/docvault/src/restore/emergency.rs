//! Restore of an uploaded archive that may have no backup job behind it.

use std::path::Path;

use tracing::{info, info_span};
use uuid::Uuid;

use crate::backup::manifest::Manifest;
use crate::backup::types::{BackupItem, BackupJob, BackupRequest, BackupStatus, ItemType};
use crate::broadcast::{ProgressReporter, TaskKind};
use crate::context::EngineContext;
use crate::db::{backup_repo, restore_repo};
use crate::error::{RestoreError, Result};
use crate::restore::orchestrator::RestoreOrchestrator;
use crate::restore::types::RestoreLog;
use crate::sinks::AuditEvent;
use crate::storage::FileStorage;

pub struct EmergencyRestoreOrchestrator {
    ctx: EngineContext,
}

impl EmergencyRestoreOrchestrator {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Validates and restores `archive_path` on the calling thread.
    ///
    /// Document inserts only need their structural references; a missing
    /// creating user does not block them.
    pub fn run(
        &self,
        archive_path: &Path,
        creator: Option<&str>,
        progress: &dyn ProgressReporter,
    ) -> Result<RestoreLog> {
        let log = self.prepare(archive_path, creator)?;
        self.execute(&log.id, progress)
    }

    /// Records a pending emergency restore of `archive_path`.
    pub fn prepare(&self, archive_path: &Path, creator: Option<&str>) -> Result<RestoreLog> {
        if !archive_path.is_file() {
            return Err(RestoreError::Io {
                path: archive_path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such archive"),
            }
            .into());
        }

        let log = RestoreLog::pending(
            Uuid::new_v4().to_string(),
            None,
            archive_path.to_string_lossy(),
            creator.map(str::to_string),
            true,
        );
        restore_repo::insert_log(&self.ctx.db, &log)?;
        self.ctx.audit.record(
            AuditEvent::new(TaskKind::Restore, &log.id, "requested")
                .by(creator)
                .with_detail("emergency restore of uploaded package"),
        );
        Ok(log)
    }

    /// Runs a log created by [`prepare`](Self::prepare).
    pub fn execute(&self, log_id: &str, progress: &dyn ProgressReporter) -> Result<RestoreLog> {
        let _span = info_span!("emergency_restore", log_id = %log_id).entered();
        info!("Emergency restore {} started", log_id);
        RestoreOrchestrator::new(self.ctx.clone()).run(log_id, progress)
    }
}

/// Finds the job an uploaded package belongs to, or records one for it.
///
/// A job named by the manifest is reused when it still exists. Otherwise the
/// upload is copied into the backup directory and a `Completed` job with FILE
/// items for its stored bytes is created, so later restores can find them.
pub(crate) fn resolve_job(
    ctx: &EngineContext,
    upload: &Path,
    manifest: &Manifest,
    creator: Option<&str>,
) -> Result<BackupJob> {
    if let Some(job_id) = manifest.job_id.as_deref() {
        if let Some(mut job) = backup_repo::find_job(&ctx.db, job_id)? {
            let archive_present = job
                .archive_path
                .as_deref()
                .is_some_and(|p| Path::new(p).is_file());
            if !archive_present {
                let imported = import(ctx, upload, &job.id)?;
                job.archive_path = Some(imported);
                backup_repo::update_job(&ctx.db, &job)?;
            }
            info!("Reusing backup {} for uploaded package", job.id);
            return Ok(job);
        }
    }

    let request = BackupRequest {
        creator: creator.map(str::to_string),
        ..Default::default()
    };
    let mut job = BackupJob::pending(Uuid::new_v4().to_string(), &request);
    let archive_path = import(ctx, upload, &job.id)?;
    let sidecar = ctx.config.backup_dir().join(format!("{}.manifest.json", job.id));
    manifest.write_to(&sidecar)?;

    job.status = BackupStatus::Completed;
    job.created_at = manifest.created_at;
    job.started_at = Some(manifest.created_at);
    job.completed_at = Some(manifest.created_at);
    job.since_date = manifest.since_date;
    job.total_size = std::fs::metadata(&archive_path).map(|m| m.len()).unwrap_or(0);
    job.record_count = manifest.summary.total();
    job.file_count = manifest.stored_items().count() as u64;
    job.archive_path = Some(archive_path);
    job.manifest_path = Some(sidecar.to_string_lossy().to_string());
    backup_repo::insert_job(&ctx.db, &job)?;

    let items: Vec<BackupItem> = manifest
        .stored_items()
        .map(|item| BackupItem {
            item_type: ItemType::File,
            entity_type: item.entity.clone(),
            source_id: item.id.clone(),
            content_hash: Some(item.hash.clone()),
            archive_relative_path: Some(item.path.clone()),
            metadata: serde_json::json!({
                "size": item.size,
                "fileName": item.file_name,
                "sourcePath": item.source_path,
            }),
        })
        .collect();
    backup_repo::insert_items(&ctx.db, &job.id, &items)?;

    ctx.audit.record(
        AuditEvent::new(TaskKind::Backup, &job.id, "synthesized")
            .by(creator)
            .with_detail(format!("recorded from uploaded package with {} files", items.len())),
    );
    info!("Recorded backup {} for uploaded package", job.id);
    Ok(job)
}

fn import(ctx: &EngineContext, upload: &Path, job_id: &str) -> Result<String> {
    let storage = FileStorage::new(ctx.config.backup_dir());
    let imported = storage.import(upload, &format!("docvault-uploaded-{}.zip", job_id))?;
    Ok(imported.to_string_lossy().to_string())
}
