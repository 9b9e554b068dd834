//! Pre-flight checks of a backup package before anything is restored.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::backup::archive;
use crate::backup::hasher::ContentHasher;
use crate::backup::manifest::{Manifest, MANIFEST_FILE, MANIFEST_VERSION};
use crate::backup::types::BackupJob;
use crate::records::{Document, DocumentVersion, Record, Signature};
use crate::sanitize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,
    pub extracted_path: PathBuf,
}

impl ValidationReport {
    fn new(extracted_path: &Path) -> Self {
        Self {
            is_valid: false,
            errors: Vec::new(),
            warnings: Vec::new(),
            manifest: None,
            extracted_path: extracted_path.to_path_buf(),
        }
    }

    fn finish(mut self) -> Self {
        self.is_valid = self.errors.is_empty() && self.manifest.is_some();
        self
    }
}

pub struct RestoreValidator {
    hasher: ContentHasher,
}

impl RestoreValidator {
    pub fn new(hasher: ContentHasher) -> Self {
        Self { hasher }
    }

    /// Extracts `archive_path` into `dest` and checks the package.
    ///
    /// Never mutates anything outside `dest`. Every stored file must hash to
    /// its recorded digest and every dump line must parse for the package
    /// to be valid.
    pub fn validate(
        &self,
        archive_path: &Path,
        dest: &Path,
        known_job: Option<&BackupJob>,
    ) -> ValidationReport {
        let mut report = ValidationReport::new(dest);

        if let Err(e) = archive::extract_archive(archive_path, dest) {
            report.errors.push(e.to_string());
            return report.finish();
        }

        let manifest_path = dest.join(MANIFEST_FILE);
        let content = match std::fs::read_to_string(&manifest_path) {
            Ok(content) => content,
            Err(e) => {
                report
                    .errors
                    .push(format!("{} is missing or unreadable: {}", MANIFEST_FILE, e));
                return report.finish();
            }
        };
        let manifest = match Manifest::parse(&content) {
            Ok(manifest) => manifest,
            Err(errors) => {
                report.errors.extend(errors);
                return report.finish();
            }
        };

        if manifest.version != MANIFEST_VERSION {
            report.warnings.push(format!(
                "manifest version {} is not {}; restoring anyway",
                manifest.version, MANIFEST_VERSION
            ));
        }

        check_dump::<Document>(dest, &mut report);
        check_dump::<DocumentVersion>(dest, &mut report);
        check_dump::<Signature>(dest, &mut report);

        if let (Some(job), Some(job_id)) = (known_job, manifest.job_id.as_deref()) {
            if job.id != job_id {
                report.warnings.push(format!(
                    "manifest belongs to backup {} but was requested as {}",
                    job_id, job.id
                ));
            }
        }

        self.verify_stored_files(dest, &manifest, &mut report);

        if report.errors.is_empty() {
            debug!(
                "Package valid: {} file entries, {} records",
                manifest.items.len(),
                manifest.summary.total()
            );
        } else {
            warn!("Package invalid: {} errors", report.errors.len());
        }
        report.manifest = Some(manifest);
        report.finish()
    }

    fn verify_stored_files(
        &self,
        dest: &Path,
        manifest: &Manifest,
        report: &mut ValidationReport,
    ) {
        for item in manifest.stored_items() {
            let path = match sanitize::safe_join(dest, &item.path) {
                Ok(path) => path,
                Err(e) => {
                    report.errors.push(e.to_string());
                    continue;
                }
            };
            if !path.is_file() {
                report
                    .errors
                    .push(format!("stored file {} is missing from the package", item.path));
                continue;
            }
            match self.hasher.hash_file(&path) {
                Ok((actual, _)) if actual == item.hash => {}
                Ok((actual, _)) => report.errors.push(format!(
                    "digest mismatch for {}: expected {}, got {}",
                    item.path, item.hash, actual
                )),
                Err(e) => report.errors.push(e.to_string()),
            }
        }
    }
}

/// Parses every line of the dump for `R`. A missing dump is only a warning.
fn check_dump<R: Record>(dest: &Path, report: &mut ValidationReport) {
    let dump = R::KIND.dump_path();
    let path = dest.join(&dump);
    if !path.is_file() {
        report.warnings.push(format!("record dump {} is missing", dump));
        return;
    }

    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) => {
            report.errors.push(format!("{} is unreadable: {}", dump, e));
            return;
        }
    };
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                report.errors.push(format!("{} line {}: {}", dump, index + 1, e));
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        if let Err(e) = serde_json::from_str::<R>(&line) {
            report.errors.push(format!("{} line {}: {}", dump, index + 1, e));
        }
    }
}
