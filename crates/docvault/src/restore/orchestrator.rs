//! Drives one restore through validation, the database phase and the file
//! phase, recording every step.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, info_span, warn};

use crate::backup::hasher::ContentHasher;
use crate::backup::manifest::Manifest;
use crate::broadcast::{ProgressReporter, ProgressUpdate, TaskKind};
use crate::context::EngineContext;
use crate::db::{backup_repo, restore_repo};
use crate::error::{RestoreError, Result};
use crate::restore::conflict::{ConflictStrategy, LastWriteWins};
use crate::restore::db_phase::{DbRestorer, InsertPolicy};
use crate::restore::emergency;
use crate::restore::file_phase::FileRestorer;
use crate::restore::journal::Journal;
use crate::restore::types::{RestoreLog, RestoreStatus, StepEvent, StepKind, StepPhase};
use crate::restore::validator::RestoreValidator;
use crate::sinks::{Notification, Outcome};
use crate::storage::{WorkDir, WorkKind};

pub struct RestoreOrchestrator {
    ctx: EngineContext,
    strategy: Arc<dyn ConflictStrategy>,
}

impl RestoreOrchestrator {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            strategy: Arc::new(LastWriteWins),
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn ConflictStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Runs the restore identified by `log_id`, which must be `Pending`.
    ///
    /// A package that fails validation never reaches the database phase.
    pub fn run(&self, log_id: &str, progress: &dyn ProgressReporter) -> Result<RestoreLog> {
        let _span = info_span!("restore", log_id = %log_id).entered();

        let log = restore_repo::find_log(&self.ctx.db, log_id)?
            .ok_or_else(|| RestoreError::NotFound(log_id.to_string()))?;
        let mut journal = Journal::new(&self.ctx, log, progress);

        match self.execute(&mut journal) {
            Ok(()) => {
                journal.transition(RestoreStatus::Completed)?;
                let message = format!(
                    "Restore completed: {} records applied, {} files restored, {} skipped",
                    journal.log.restored_records,
                    journal.log.restored_files,
                    journal.log.skipped_files
                );
                info!("{}", message);
                self.notify(&journal.log, Outcome::Completed, &message);
                progress.report(ProgressUpdate::Completed {
                    message,
                    counters: journal.counters(),
                });
                Ok(journal.log)
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Restore {} failed: {}", log_id, message);
                if let Err(persist) = journal.fail(&message) {
                    warn!("Could not persist failure of restore {}: {}", log_id, persist);
                }
                self.notify(&journal.log, Outcome::Failed, &message);
                progress.report(ProgressUpdate::Failed { error: message });
                Err(e)
            }
        }
    }

    fn execute(&self, journal: &mut Journal<'_>) -> Result<()> {
        let config = &self.ctx.config;
        let db = &self.ctx.db;
        let hasher = ContentHasher::new(config.hash_chunk_size);

        journal.transition(RestoreStatus::Validating)?;
        let work = WorkDir::create(&config.work_dir(), WorkKind::Restore)?;
        let manifest = {
            let _step = info_span!("validate").entered();
            self.validate(journal, &hasher, work.path())?
        };

        if journal.log.emergency {
            let archive = PathBuf::from(&journal.log.archive_path);
            let job = emergency::resolve_job(
                &self.ctx,
                &archive,
                &manifest,
                journal.log.creator.as_deref(),
            )?;
            journal.step(StepEvent::new(
                StepPhase::Validation,
                StepKind::JobResolved,
                format!("restoring as backup {}", job.id),
            ))?;
            journal.log.backup_job_id = Some(job.id);
            if let Some(path) = job.archive_path {
                journal.log.archive_path = path;
            }
        }

        journal.log.total_records = manifest.summary.total();
        journal.log.total_files = manifest.items.len() as u64;
        journal.save()?;

        let policy = if journal.log.emergency {
            InsertPolicy::Emergency
        } else {
            InsertPolicy::Standard
        };

        journal.transition(RestoreStatus::RestoringDb)?;
        {
            let _step = info_span!("restore_db").entered();
            DbRestorer::new(db, self.strategy.as_ref(), policy).restore(work.path(), journal)?;
        }

        journal.transition(RestoreStatus::RestoringFiles)?;
        {
            let _step = info_span!("restore_files").entered();
            FileRestorer::new(db, &hasher, &config.data_dir()).restore(
                work.path(),
                &manifest,
                journal,
            )?;
        }
        Ok(())
    }

    /// Runs the validator and copies its findings into the step log.
    fn validate(
        &self,
        journal: &mut Journal<'_>,
        hasher: &ContentHasher,
        dest: &Path,
    ) -> Result<Manifest> {
        let known_job = match &journal.log.backup_job_id {
            Some(id) => backup_repo::find_job(&self.ctx.db, id)?,
            None => None,
        };
        let archive = PathBuf::from(&journal.log.archive_path);
        let report = RestoreValidator::new(*hasher).validate(&archive, dest, known_job.as_ref());

        for warning in &report.warnings {
            journal.step(StepEvent::new(
                StepPhase::Validation,
                StepKind::ValidationWarning,
                warning.as_str(),
            ))?;
        }
        for error in &report.errors {
            journal.step(StepEvent::new(
                StepPhase::Validation,
                StepKind::ValidationError,
                error.as_str(),
            ))?;
        }

        match report.manifest {
            Some(manifest) if report.is_valid => Ok(manifest),
            _ => Err(RestoreError::Validation(report.errors.join("; ")).into()),
        }
    }

    fn notify(&self, log: &RestoreLog, outcome: Outcome, message: &str) {
        self.ctx.notifier.notify(Notification {
            kind: TaskKind::Restore,
            task_id: log.id.clone(),
            outcome,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::types::{BackupJob, BackupRequest};
    use crate::backup::BackupOrchestrator;
    use crate::broadcast::NoopProgress;
    use crate::db::record_repo;
    use crate::records::Document;
    use crate::test_support::TestEnv;

    fn backup(env: &TestEnv, id: &str) -> BackupJob {
        backup_repo::insert_job(&env.ctx.db, &BackupJob::pending(id, &BackupRequest::default()))
            .unwrap();
        BackupOrchestrator::new(env.ctx.clone())
            .run(id, &NoopProgress)
            .unwrap()
    }

    fn restore(env: &TestEnv, job: &BackupJob, log_id: &str) -> Result<RestoreLog> {
        let log = RestoreLog::pending(
            log_id,
            Some(job.id.clone()),
            job.archive_path.clone().unwrap(),
            None,
            false,
        );
        restore_repo::insert_log(&env.ctx.db, &log).unwrap();
        RestoreOrchestrator::new(env.ctx.clone()).run(log_id, &NoopProgress)
    }

    #[test]
    fn test_restore_after_loss_then_converges() {
        let env = TestEnv::new();
        let doc = env.document_with_file("d1", "d1.pdf", b"scanned");
        record_repo::insert(&env.ctx.db, &doc).unwrap();
        let job = backup(&env, "j1");

        std::fs::remove_file(env.data_dir().join("d1.pdf")).unwrap();
        let first = restore(&env, &job, "r1").unwrap();
        assert_eq!(first.status, RestoreStatus::Completed);
        assert_eq!(first.restored_records, 0);
        assert_eq!(first.restored_files, 1);
        assert_eq!(std::fs::read(env.data_dir().join("d1.pdf")).unwrap(), b"scanned");

        let second = restore(&env, &job, "r2").unwrap();
        assert_eq!(second.restored_records, 0);
        assert_eq!(second.restored_files, 0);
        assert_eq!(second.skipped_files, 1);
    }

    #[test]
    fn test_tampered_package_never_restores_db() {
        let env = TestEnv::new();
        let doc = env.document_with_file("d1", "d1.pdf", b"scanned");
        record_repo::insert(&env.ctx.db, &doc).unwrap();
        let job = backup(&env, "j1");

        // Replace the archive with one whose stored file differs from its digest.
        let archive = PathBuf::from(job.archive_path.as_ref().unwrap());
        let work = env.temp.path().join("tamper");
        crate::backup::archive::extract_archive(&archive, &work).unwrap();
        std::fs::write(work.join("documents/d1/d1.pdf"), b"forged").unwrap();
        std::fs::remove_file(&archive).unwrap();
        crate::backup::archive::create_archive(&work, &archive, 6).unwrap();

        let err = restore(&env, &job, "r1").unwrap_err();
        assert!(err.to_string().contains("digest mismatch"));

        let log = restore_repo::find_log(&env.ctx.db, "r1").unwrap().unwrap();
        assert_eq!(log.status, RestoreStatus::Failed);
        let steps = restore_repo::steps_for_log(&env.ctx.db, "r1", None).unwrap();
        assert!(steps.iter().any(|s| s.step == StepKind::ValidationError));
        assert!(!steps.iter().any(|s| s.detail.contains("restoring_db")));
    }

    #[test]
    fn test_deleted_record_is_reinserted() {
        let env = TestEnv::new();
        let doc = env.document_with_file("d1", "d1.pdf", b"scanned");
        record_repo::insert(&env.ctx.db, &doc).unwrap();
        let job = backup(&env, "j1");

        env.ctx
            .db
            .with_conn(|conn| {
                conn.execute("DELETE FROM documents WHERE id = 'd1'", [])?;
                Ok(())
            })
            .unwrap();

        let log = restore(&env, &job, "r1").unwrap();
        assert_eq!(log.restored_records, 1);
        assert!(record_repo::find::<Document>(&env.ctx.db, "d1")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_malformed_dump_leaves_database_untouched() {
        let env = TestEnv::new();
        let doc = env.document_with_file("d1", "d1.pdf", b"scanned");
        record_repo::insert(&env.ctx.db, &doc).unwrap();
        let job = backup(&env, "j1");

        // The first line is a valid row; the broken one follows it.
        let archive = PathBuf::from(job.archive_path.as_ref().unwrap());
        let work = env.temp.path().join("broken");
        crate::backup::archive::extract_archive(&archive, &work).unwrap();
        let dump = work.join("database/documents.jsonl");
        let mut content = std::fs::read_to_string(&dump).unwrap();
        content.push_str("{broken\n");
        std::fs::write(&dump, content).unwrap();
        std::fs::remove_file(&archive).unwrap();
        crate::backup::archive::create_archive(&work, &archive, 6).unwrap();

        env.ctx
            .db
            .with_conn(|conn| {
                conn.execute("DELETE FROM documents WHERE id = 'd1'", [])?;
                Ok(())
            })
            .unwrap();

        let err = restore(&env, &job, "r1").unwrap_err();
        assert!(err.to_string().contains("database/documents.jsonl line 2"));
        assert!(record_repo::find::<Document>(&env.ctx.db, "d1")
            .unwrap()
            .is_none());

        let log = restore_repo::find_log(&env.ctx.db, "r1").unwrap().unwrap();
        assert_eq!(log.status, RestoreStatus::Failed);
        assert_eq!(log.restored_records, 0);
        let steps = restore_repo::steps_for_log(&env.ctx.db, "r1", None).unwrap();
        assert!(steps.iter().any(|s| s.step == StepKind::ValidationError));
        assert!(!steps.iter().any(|s| s.step == StepKind::RecordInserted));
    }
}
