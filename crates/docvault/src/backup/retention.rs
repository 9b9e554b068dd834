//! Retention of completed backups and cleanup of stale scratch space.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::broadcast::TaskKind;
use crate::db::{backup_repo, Database};
use crate::lease::JobLeases;
use crate::storage::filesystem::{self, WorkKind};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    pub deleted_jobs: Vec<String>,
    pub swept_work_dirs: usize,
}

pub struct RetentionManager {
    max_retained: usize,
    work_root: PathBuf,
}

impl RetentionManager {
    pub fn new(max_retained: usize, work_root: &Path) -> Self {
        Self {
            max_retained: max_retained.max(1),
            work_root: work_root.to_path_buf(),
        }
    }

    /// Deletes completed jobs beyond the newest `max_retained` together
    /// with their archives, then sweeps leftover work directories.
    ///
    /// Best-effort: failures are logged and the rest continues.
    pub fn apply(&self, db: &Database, leases: &JobLeases) -> RetentionReport {
        let mut report = RetentionReport::default();

        let expired = match backup_repo::completed_beyond(db, self.max_retained) {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("Retention could not list backups: {}", e);
                Vec::new()
            }
        };

        for job in expired {
            for path in [&job.archive_path, &job.manifest_path].into_iter().flatten() {
                if let Err(e) = filesystem::remove_file(Path::new(path)) {
                    warn!("Retention could not remove file of backup {}: {}", job.id, e);
                }
            }
            match backup_repo::delete_job(db, &job.id) {
                Ok(()) => report.deleted_jobs.push(job.id),
                Err(e) => warn!("Retention could not delete backup {}: {}", job.id, e),
            }
        }

        report.swept_work_dirs += filesystem::sweep_work_dirs(&self.work_root, WorkKind::Backup);
        // A running restore still reads its extraction directory.
        if !leases.is_held(TaskKind::Restore) {
            report.swept_work_dirs +=
                filesystem::sweep_work_dirs(&self.work_root, WorkKind::Restore);
        }

        if !report.deleted_jobs.is_empty() || report.swept_work_dirs > 0 {
            info!(
                "Retention removed {} backups and {} work directories",
                report.deleted_jobs.len(),
                report.swept_work_dirs
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::types::{BackupJob, BackupRequest, BackupStatus};
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn completed(dir: &Path, id: &str, minutes: i64) -> BackupJob {
        let at = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes);
        let archive = dir.join(format!("{}.zip", id));
        std::fs::write(&archive, b"zip").unwrap();
        let mut job = BackupJob::pending(id, &BackupRequest::default());
        job.status = BackupStatus::Completed;
        job.completed_at = Some(at);
        job.archive_path = Some(archive.to_string_lossy().to_string());
        job
    }

    #[test]
    fn test_keeps_newest_and_deletes_rest() {
        let temp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        for (id, minutes) in [("j1", 1), ("j2", 2), ("j3", 3), ("j4", 4)] {
            backup_repo::insert_job(&db, &completed(temp.path(), id, minutes)).unwrap();
        }

        let manager = RetentionManager::new(2, &temp.path().join("work"));
        let report = manager.apply(&db, &JobLeases::new());

        let mut deleted = report.deleted_jobs.clone();
        deleted.sort();
        assert_eq!(deleted, vec!["j1", "j2"]);
        assert!(!temp.path().join("j1.zip").exists());
        assert!(temp.path().join("j4.zip").exists());
        assert!(backup_repo::find_job(&db, "j1").unwrap().is_none());
        assert!(backup_repo::find_job(&db, "j3").unwrap().is_some());
    }

    #[test]
    fn test_restore_dirs_kept_while_restore_runs() {
        let temp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let work = temp.path().join("work");
        std::fs::create_dir_all(work.join("backup-old")).unwrap();
        std::fs::create_dir_all(work.join("restore-active")).unwrap();

        let leases = JobLeases::new();
        let guard = leases.try_acquire(TaskKind::Restore).unwrap();
        let manager = RetentionManager::new(10, &work);

        let report = manager.apply(&db, &leases);
        assert_eq!(report.swept_work_dirs, 1);
        assert!(work.join("restore-active").exists());

        drop(guard);
        manager.apply(&db, &leases);
        assert!(!work.join("restore-active").exists());
    }

    #[test]
    fn test_missing_archive_is_not_an_error() {
        let temp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let job = completed(temp.path(), "gone", 1);
        std::fs::remove_file(job.archive_path.as_ref().unwrap()).unwrap();
        backup_repo::insert_job(&db, &job).unwrap();
        backup_repo::insert_job(&db, &completed(temp.path(), "kept", 2)).unwrap();

        let report = RetentionManager::new(1, temp.path()).apply(&db, &JobLeases::new());
        assert_eq!(report.deleted_jobs, vec!["gone"]);
    }
}
