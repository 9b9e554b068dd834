//! Zip packaging and extraction.

use std::fs::File;
use std::io;
use std::path::Path;

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{BackupError, RestoreError};
use crate::sanitize;
use crate::storage::filesystem;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Compresses every file under `source_dir` into a zip at `target` and
/// returns the archive size in bytes. Entry names are `/`-separated paths
/// relative to `source_dir`, added in sorted order.
pub fn create_archive(source_dir: &Path, target: &Path, level: i64) -> Result<u64, BackupError> {
    let archive_err = |reason: String| BackupError::Archive {
        path: target.to_path_buf(),
        reason,
    };

    if let Some(parent) = target.parent() {
        filesystem::ensure_directory(parent).map_err(|e| archive_err(e.to_string()))?;
    }

    let result = write_zip(source_dir, target, level).map_err(archive_err);
    if result.is_err() {
        let _ = filesystem::remove_file(target);
    }
    result?;

    let size = std::fs::metadata(target)
        .map_err(|e| archive_err(e.to_string()))?
        .len();
    Ok(size)
}

fn write_zip(source_dir: &Path, target: &Path, level: i64) -> Result<(), String> {
    let file = File::create(target).map_err(|e| e.to_string())?;
    let mut zip = ZipWriter::new(file);

    let level = level.clamp(0, 9);
    let file_options = if level == 0 {
        SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
    } else {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(level))
    };
    let dir_options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for entry in WalkDir::new(source_dir).sort_by_file_name().min_depth(1) {
        let entry = entry.map_err(|e| e.to_string())?;
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|e| e.to_string())?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, dir_options)
                .map_err(|e| e.to_string())?;
        } else if entry.file_type().is_file() {
            zip.start_file(name.clone(), file_options)
                .map_err(|e| format!("{}: {}", name, e))?;
            let mut source = File::open(entry.path()).map_err(|e| format!("{}: {}", name, e))?;
            io::copy(&mut source, &mut zip).map_err(|e| format!("{}: {}", name, e))?;
        }
    }

    zip.finish().map_err(|e| e.to_string())?;
    Ok(())
}

/// Extracts an archive into `dest`, returning the number of files written.
///
/// Entries that would escape `dest` and symlink entries are refused.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<usize, RestoreError> {
    let invalid = |reason: String| {
        RestoreError::Validation(format!(
            "cannot extract '{}': {}",
            sanitize::redact_path(archive_path),
            reason
        ))
    };

    let file = File::open(archive_path).map_err(|e| RestoreError::Io {
        path: archive_path.to_path_buf(),
        source: e,
    })?;
    let mut zip = ZipArchive::new(file).map_err(|e| invalid(e.to_string()))?;

    let mut written = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| invalid(e.to_string()))?;
        let name = entry.name().to_string();

        if let Some(mode) = entry.unix_mode() {
            if mode & S_IFMT == S_IFLNK {
                return Err(invalid(format!("symlink entry '{}'", name)));
            }
        }

        let target = sanitize::safe_join(dest, name.trim_end_matches('/'))
            .map_err(|e| invalid(e.to_string()))?;

        if entry.is_dir() {
            filesystem::ensure_directory(&target).map_err(|e| invalid(e.to_string()))?;
            continue;
        }

        filesystem::write_stream(&mut entry, &target).map_err(|e| invalid(e.to_string()))?;
        written += 1;
    }

    Ok(written)
}

/// Copies a single entry of an archive to `dst`.
pub fn extract_entry(
    archive_path: &Path,
    entry_name: &str,
    dst: &Path,
) -> Result<u64, RestoreError> {
    let io_err = |e: io::Error| RestoreError::Io {
        path: archive_path.to_path_buf(),
        source: e,
    };

    let file = File::open(archive_path).map_err(io_err)?;
    let mut zip = ZipArchive::new(file).map_err(|e| io_err(io::Error::other(e)))?;
    let mut entry = zip
        .by_name(entry_name)
        .map_err(|e| io_err(io::Error::new(io::ErrorKind::NotFound, e)))?;

    filesystem::write_stream(&mut entry, dst).map_err(|e| RestoreError::Io {
        path: dst.to_path_buf(),
        source: io::Error::other(e),
    })
}
