//! Helpers for sanitizing paths before they reach spans or the filesystem.
//!
//! Traces are safe to share for debugging, so span fields only carry file
//! names. Paths read from an archive are untrusted and must stay inside the
//! directory they are joined onto.

use std::path::{Component, Path, PathBuf};

use crate::error::StorageError;

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields: reveals the file name without the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Turns an arbitrary string into a single safe path segment.
///
/// Separators and control characters become `_`; `.` and `..` are replaced.
pub fn path_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Joins a relative, `/`-separated path onto `root`, rejecting anything
/// that would escape it (absolute paths, `..`, drive prefixes).
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf, StorageError> {
    let candidate = Path::new(relative);
    let mut joined = root.to_path_buf();
    let mut depth = 0usize;

    for component in candidate.components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::UnsafePath(candidate.to_path_buf()));
            }
        }
    }

    if depth == 0 {
        return Err(StorageError::UnsafePath(candidate.to_path_buf()));
    }

    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/srv/docvault/backups/backup-1.zip")),
            "backup-1.zip"
        );
    }

    #[test]
    fn test_redact_path_no_filename() {
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_path_segment_strips_separators() {
        assert_eq!(path_segment("a/b\\c.pdf"), "a_b_c.pdf");
        assert_eq!(path_segment(".."), "_");
        assert_eq!(path_segment("  "), "_");
        assert_eq!(path_segment("informe final.pdf"), "informe final.pdf");
    }

    #[test]
    fn test_safe_join_accepts_nested_relative_path() {
        let joined = safe_join(Path::new("/data"), "2026/03/file.pdf").unwrap();
        assert_eq!(joined, PathBuf::from("/data/2026/03/file.pdf"));
    }

    #[test]
    fn test_safe_join_rejects_escapes() {
        assert!(safe_join(Path::new("/data"), "../etc/passwd").is_err());
        assert!(safe_join(Path::new("/data"), "/etc/passwd").is_err());
        assert!(safe_join(Path::new("/data"), "a/../../b").is_err());
        assert!(safe_join(Path::new("/data"), "").is_err());
    }
}
