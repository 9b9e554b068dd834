use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    pub version: String,
    pub database_path: String,
    /// Root of the live file tree; record file paths are relative to it.
    pub data_directory: String,
    pub backup_directory: String,
    #[serde(default)]
    pub work_directory: Option<String>,
    #[serde(default = "default_max_retained_backups")]
    pub max_retained_backups: usize,
    #[serde(default = "default_hash_chunk_size")]
    pub hash_chunk_size: usize,
    #[serde(default = "default_compression_level")]
    pub compression_level: i64,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

fn default_max_retained_backups() -> usize {
    10
}

fn default_hash_chunk_size() -> usize {
    64 * 1024
}

fn default_compression_level() -> i64 {
    9
}

fn default_worker_count() -> usize {
    2
}

impl BackupConfig {
    /// Builds a config with defaults for everything except the three roots.
    pub fn new(
        database_path: impl Into<String>,
        data_directory: impl Into<String>,
        backup_directory: impl Into<String>,
    ) -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: database_path.into(),
            data_directory: data_directory.into(),
            backup_directory: backup_directory.into(),
            work_directory: None,
            max_retained_backups: default_max_retained_backups(),
            hash_chunk_size: default_hash_chunk_size(),
            compression_level: default_compression_level(),
            worker_count: default_worker_count(),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_directory)
    }

    pub fn backup_dir(&self) -> PathBuf {
        PathBuf::from(&self.backup_directory)
    }

    /// Scratch space for packaging and extraction.
    pub fn work_dir(&self) -> PathBuf {
        match &self.work_directory {
            Some(dir) => PathBuf::from(dir),
            None => self.backup_dir().join(".work"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config: BackupConfig = serde_json::from_str(
            r#"{
                "version": "1.0",
                "database_path": "/srv/dms.db",
                "data_directory": "/srv/files",
                "backup_directory": "/srv/backups"
            }"#,
        )
        .unwrap();

        assert_eq!(config.max_retained_backups, 10);
        assert_eq!(config.hash_chunk_size, 65536);
        assert_eq!(config.compression_level, 9);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.work_dir(), PathBuf::from("/srv/backups/.work"));
    }

    #[test]
    fn test_explicit_work_directory() {
        let mut config = BackupConfig::new("/a.db", "/files", "/backups");
        config.work_directory = Some("/tmp/dv".to_string());
        assert_eq!(config.work_dir(), PathBuf::from("/tmp/dv"));
    }
}
