use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::sanitize;

/// Copies `src` to `dst` through a sibling `.partial` file, so a crash never
/// leaves a truncated file under the final name.
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64, StorageError> {
    if let Some(parent) = dst.parent() {
        ensure_directory(parent)?;
    }

    let partial = partial_path(dst);
    let copy_err = |e: io::Error| StorageError::CopyFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    };

    let mut reader = File::open(src).map_err(copy_err)?;
    let mut writer = File::create(&partial).map_err(copy_err)?;
    let copied = io::copy(&mut reader, &mut writer).and_then(|n| {
        writer.sync_all()?;
        Ok(n)
    });
    let copied = match copied {
        Ok(n) => n,
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            return Err(copy_err(e));
        }
    };

    std::fs::rename(&partial, dst).map_err(|e| {
        let _ = std::fs::remove_file(&partial);
        copy_err(e)
    })?;
    Ok(copied)
}

/// Writes a stream to `dst` the same way [`copy_file`] does.
pub fn write_stream<R: io::Read>(reader: &mut R, dst: &Path) -> Result<u64, StorageError> {
    if let Some(parent) = dst.parent() {
        ensure_directory(parent)?;
    }

    let partial = partial_path(dst);
    let write_err = |e: io::Error| StorageError::WriteFile {
        path: dst.to_path_buf(),
        source: e,
    };

    let mut writer = File::create(&partial).map_err(write_err)?;
    let written = match io::copy(reader, &mut writer).and_then(|n| {
        writer.sync_all()?;
        Ok(n)
    }) {
        Ok(n) => n,
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            return Err(write_err(e));
        }
    };

    std::fs::rename(&partial, dst).map_err(|e| {
        let _ = std::fs::remove_file(&partial);
        write_err(e)
    })?;
    Ok(written)
}

fn partial_path(dst: &Path) -> PathBuf {
    let mut name = dst.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    dst.with_file_name(name)
}

pub fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Removes a file; a file that is already gone is not an error.
pub fn remove_file(path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Removes a directory tree; a directory that is already gone is not an error.
pub fn remove_dir_all(path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// A rooted view of a directory tree whose relative paths come from records
/// or archives and therefore cannot be trusted.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a relative path, refusing anything outside the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        sanitize::safe_join(&self.root, relative)
    }

    /// Copies an external file into the root under `filename`, picking a
    /// free name when it is taken.
    pub fn import(&self, source: &Path, filename: &str) -> Result<PathBuf, StorageError> {
        ensure_directory(&self.root)?;
        let target = self.resolve_conflict(&self.root, &sanitize::path_segment(filename))?;
        copy_file(source, &target)?;
        Ok(target)
    }

    /// Resolves filename conflicts by finding an available name.
    fn resolve_conflict(&self, directory: &Path, filename: &str) -> Result<PathBuf, StorageError> {
        let path = directory.join(filename);

        if std::fs::symlink_metadata(&path).is_err() {
            return Ok(path);
        }

        let (base, ext) = if let Some(dot_pos) = filename.rfind('.') {
            (&filename[..dot_pos], Some(&filename[dot_pos..]))
        } else {
            (filename, None)
        };

        for counter in 2..=1000 {
            let new_filename = match ext {
                Some(ext) => format!("{}_{}{}", base, counter, ext),
                None => format!("{}_{}", base, counter),
            };

            let new_path = directory.join(&new_filename);
            if std::fs::symlink_metadata(&new_path).is_err() {
                return Ok(new_path);
            }
        }

        Err(StorageError::FileExists(path))
    }
}

/// Kind of scratch directory under the work root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    Backup,
    Restore,
}

impl WorkKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            WorkKind::Backup => "backup-",
            WorkKind::Restore => "restore-",
        }
    }
}

/// A scratch directory that is removed when dropped.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    pub fn create(work_root: &Path, kind: WorkKind) -> Result<Self, StorageError> {
        let path = work_root.join(format!("{}{}", kind.prefix(), uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).map_err(|e| StorageError::CreateDirectory {
            path: path.clone(),
            source: e,
        })?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Err(e) = remove_dir_all(&self.path) {
            log::warn!("Failed to remove work directory: {}", e);
        }
    }
}

/// Deletes leftover scratch directories of one kind. Returns how many were
/// removed; individual failures are logged and skipped.
pub fn sweep_work_dirs(work_root: &Path, kind: WorkKind) -> usize {
    let entries = match std::fs::read_dir(work_root) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let matches = entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with(kind.prefix()))
            .unwrap_or(false);
        if !is_dir || !matches {
            continue;
        }
        match remove_dir_all(&entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => log::warn!("Failed to sweep work directory: {}", e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_file_creates_parents() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("a.pdf");
        std::fs::write(&src, b"Hello, World!").unwrap();

        let dst = temp_dir.path().join("deep/nested/b.pdf");
        let copied = copy_file(&src, &dst).unwrap();

        assert_eq!(copied, 13);
        assert_eq!(std::fs::read(&dst).unwrap(), b"Hello, World!");
        assert!(!temp_dir.path().join("deep/nested/b.pdf.partial").exists());
    }

    #[test]
    fn test_copy_missing_source() {
        let temp_dir = TempDir::new().unwrap();
        let result = copy_file(
            &temp_dir.path().join("nonexistent.pdf"),
            &temp_dir.path().join("out.pdf"),
        );

        match result {
            Err(StorageError::CopyFile { from, .. }) => {
                assert!(from.to_string_lossy().contains("nonexistent.pdf"));
            }
            other => panic!("Expected CopyFile error, got {:?}", other),
        }
    }

    #[test]
    fn test_write_stream() {
        let temp_dir = TempDir::new().unwrap();
        let dst = temp_dir.path().join("x/y.bin");
        let written = write_stream(&mut &b"abc"[..], &dst).unwrap();
        assert_eq!(written, 3);
        assert_eq!(std::fs::read(&dst).unwrap(), b"abc");
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        remove_file(&temp_dir.path().join("gone")).unwrap();
        remove_dir_all(&temp_dir.path().join("gone-dir")).unwrap();
    }

    #[test]
    fn test_import_resolves_conflicts() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("upload.zip");
        std::fs::write(&src, b"zip").unwrap();
        let storage = FileStorage::new(temp_dir.path().join("backups"));

        let first = storage.import(&src, "backup.zip").unwrap();
        let second = storage.import(&src, "backup.zip").unwrap();

        assert!(first.ends_with("backup.zip"));
        assert!(second.ends_with("backup_2.zip"));
        assert!(src.exists());
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let storage = FileStorage::new("/srv/files");
        assert!(storage.resolve("../etc/passwd").is_err());
        assert_eq!(
            storage.resolve("2026/a.pdf").unwrap(),
            PathBuf::from("/srv/files/2026/a.pdf")
        );
    }

    #[test]
    fn test_work_dir_removed_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let path = {
            let work = WorkDir::create(temp_dir.path(), WorkKind::Backup).unwrap();
            assert!(work.path().is_dir());
            work.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_sweep_only_matching_kind() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("backup-1")).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("backup-2")).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("restore-1")).unwrap();
        std::fs::write(temp_dir.path().join("backup-file"), b"x").unwrap();

        assert_eq!(sweep_work_dirs(temp_dir.path(), WorkKind::Backup), 2);
        assert!(temp_dir.path().join("restore-1").exists());
        assert!(temp_dir.path().join("backup-file").exists());
        assert_eq!(sweep_work_dirs(&temp_dir.path().join("missing"), WorkKind::Restore), 0);
    }
}
