//! Runs one backup job from `Pending` to a terminal state.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info, info_span, warn};

use crate::backup::dedup::Deduplicator;
use crate::backup::hasher::ContentHasher;
use crate::backup::package::{PackageBuilder, PackageOutcome, PackageRequest};
use crate::backup::retention::RetentionManager;
use crate::backup::selector::ChangeSetSelector;
use crate::backup::types::{BackupJob, BackupStatus};
use crate::broadcast::{Counters, Phase, ProgressReporter, ProgressUpdate, TaskKind};
use crate::context::EngineContext;
use crate::db::backup_repo;
use crate::error::{BackupError, DocvaultError, Result};
use crate::sinks::{AuditEvent, Notification, Outcome};
use crate::storage::filesystem;
use crate::storage::{WorkDir, WorkKind};

pub struct BackupOrchestrator {
    ctx: EngineContext,
}

impl BackupOrchestrator {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Runs the job identified by `job_id`, which must be `Pending`.
    ///
    /// Every failure is persisted on the job row before it is returned.
    pub fn run(&self, job_id: &str, progress: &dyn ProgressReporter) -> Result<BackupJob> {
        let _span = info_span!("backup", job_id = %job_id).entered();

        let mut job = backup_repo::find_job(&self.ctx.db, job_id)?
            .ok_or_else(|| BackupError::NotFound(job_id.to_string()))?;

        let outcome = self
            .start(&mut job)
            .and_then(|previous| self.execute(&mut job, previous, progress))
            .and_then(|outcome| self.commit(&mut job, &outcome).map(|()| outcome));

        match outcome {
            Ok(outcome) => {
                self.announce(&job, &outcome, progress);
                self.apply_retention(progress);
                Ok(job)
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Backup {} failed: {}", job.id, message);
                self.fail(&mut job, &message);
                progress.report(ProgressUpdate::Failed { error: message });
                Err(e)
            }
        }
    }

    /// Moves the job to `Running` and returns the reference job for an
    /// incremental run.
    fn start(&self, job: &mut BackupJob) -> Result<Option<BackupJob>> {
        let previous = backup_repo::latest_completed(&self.ctx.db)?;

        transition(job, BackupStatus::Running)?;
        job.started_at = Some(Utc::now());
        job.since_date = previous.as_ref().and_then(|p| p.completed_at);
        backup_repo::update_job(&self.ctx.db, job)?;

        self.ctx.audit.record(
            AuditEvent::new(TaskKind::Backup, &job.id, BackupStatus::Running.as_str())
                .by(job.creator.as_deref()),
        );
        match job.since_date {
            Some(since) => info!("Incremental backup since {}", since.to_rfc3339()),
            None => info!("Full backup"),
        }
        Ok(previous)
    }

    fn execute(
        &self,
        job: &mut BackupJob,
        previous: Option<BackupJob>,
        progress: &dyn ProgressReporter,
    ) -> Result<PackageOutcome> {
        let config = &self.ctx.config;
        let db = &self.ctx.db;

        let changes = {
            let _step = info_span!("select").entered();
            progress.phase(Phase::Selecting, "Selecting changed records...");
            ChangeSetSelector::new(db).select(job.since_date)?
        };
        debug!("Change set holds {} records", changes.record_count());

        let previous_hashes = match &previous {
            Some(p) => backup_repo::content_hashes_for_job(db, &p.id)?,
            None => Default::default(),
        };
        let mut dedup = Deduplicator::new(previous_hashes);

        let backup_dir = config.backup_dir();
        filesystem::ensure_directory(&backup_dir)?;
        let archive_path = backup_dir.join(archive_name(&job.id, job.created_at));
        let sidecar_path = backup_dir.join(format!("{}.manifest.json", job.id));

        let work = WorkDir::create(&config.work_dir(), WorkKind::Backup)?;
        let builder = PackageBuilder::new(
            ContentHasher::new(config.hash_chunk_size),
            &config.data_dir(),
            config.compression_level,
        );
        let request = PackageRequest {
            job_id: &job.id,
            created_by: job.creator.as_deref(),
            work_dir: work.path(),
            archive_path: &archive_path,
        };

        let packaged: Result<PackageOutcome> = {
            let _step = info_span!("package").entered();
            progress.phase(Phase::Packaging, "Writing dumps and copying files...");
            builder
                .build(&request, &changes, &mut dedup, progress)
                .map_err(DocvaultError::from)
                .and_then(|outcome| {
                    outcome.manifest.write_to(&sidecar_path)?;
                    Ok(outcome)
                })
        };

        match packaged {
            Ok(outcome) => {
                job.archive_path = Some(path_string(&archive_path));
                job.manifest_path = Some(path_string(&sidecar_path));
                if outcome.unreadable_files > 0 {
                    warn!(
                        "{} referenced files could not be read",
                        outcome.unreadable_files
                    );
                }
                Ok(outcome)
            }
            Err(e) => {
                discard(&archive_path);
                discard(&sidecar_path);
                Err(e)
            }
        }
    }

    /// Stores the items and the `Completed` row together. On failure the
    /// archive and sidecar are removed and the job is left `Running`.
    fn commit(&self, job: &mut BackupJob, outcome: &PackageOutcome) -> Result<()> {
        let mut completed = job.clone();
        transition(&mut completed, BackupStatus::Completed)?;
        completed.completed_at = Some(Utc::now());
        completed.total_size = outcome.archive_size;
        completed.record_count = outcome.record_count;
        completed.file_count = outcome.file_count;

        if let Err(e) = backup_repo::complete_job(&self.ctx.db, &completed, &outcome.items) {
            for path in [job.archive_path.take(), job.manifest_path.take()]
                .into_iter()
                .flatten()
            {
                discard(Path::new(&path));
            }
            return Err(e.into());
        }
        *job = completed;
        Ok(())
    }

    fn announce(
        &self,
        job: &BackupJob,
        outcome: &PackageOutcome,
        progress: &dyn ProgressReporter,
    ) {
        let message = format!(
            "Backup completed: {} records, {} files, {} bytes",
            job.record_count, job.file_count, job.total_size
        );
        info!("{}", message);

        self.ctx.audit.record(
            AuditEvent::new(TaskKind::Backup, &job.id, BackupStatus::Completed.as_str())
                .by(job.creator.as_deref())
                .with_detail(message.clone()),
        );
        self.ctx.notifier.notify(Notification {
            kind: TaskKind::Backup,
            task_id: job.id.clone(),
            outcome: Outcome::Completed,
            message: message.clone(),
        });
        let listed = outcome.manifest.items.len() as u64;
        progress.report(ProgressUpdate::Completed {
            message,
            counters: Counters {
                total_records: outcome.record_count,
                done_records: outcome.record_count,
                total_files: listed,
                done_files: outcome.file_count,
                skipped_files: listed.saturating_sub(outcome.file_count),
            },
        });
    }

    /// Marks the job `Failed`. Errors here are logged since the original
    /// failure is what the caller receives.
    fn fail(&self, job: &mut BackupJob, message: &str) {
        if job.status.is_terminal() {
            return;
        }
        job.status = BackupStatus::Failed;
        job.completed_at = Some(Utc::now());
        job.error_message = Some(message.to_string());
        if let Err(e) = backup_repo::update_job(&self.ctx.db, job) {
            warn!("Could not persist failure of backup {}: {}", job.id, e);
        }

        self.ctx.audit.record(
            AuditEvent::new(TaskKind::Backup, &job.id, BackupStatus::Failed.as_str())
                .by(job.creator.as_deref())
                .with_detail(message),
        );
        self.ctx.notifier.notify(Notification {
            kind: TaskKind::Backup,
            task_id: job.id.clone(),
            outcome: Outcome::Failed,
            message: message.to_string(),
        });
    }

    fn apply_retention(&self, progress: &dyn ProgressReporter) {
        let _step = info_span!("retention").entered();
        progress.phase(Phase::Retention, "Removing expired backups...");
        let manager = RetentionManager::new(
            self.ctx.config.max_retained_backups,
            &self.ctx.config.work_dir(),
        );
        manager.apply(&self.ctx.db, &self.ctx.leases);
    }
}

fn transition(job: &mut BackupJob, next: BackupStatus) -> std::result::Result<(), BackupError> {
    if !job.status.can_transition_to(next) {
        return Err(BackupError::IllegalTransition {
            from: job.status.to_string(),
            to: next.to_string(),
        });
    }
    job.status = next;
    Ok(())
}

/// `docvault-backup-<timestamp>-<job id>.zip`
fn archive_name(job_id: &str, created_at: DateTime<Utc>) -> String {
    format!(
        "docvault-backup-{}-{}.zip",
        created_at.format("%Y%m%dT%H%M%SZ"),
        job_id
    )
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn discard(path: &Path) {
    if let Err(e) = filesystem::remove_file(path) {
        warn!("Could not remove partial output: {}", e);
    }
}
