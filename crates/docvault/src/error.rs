use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocvaultError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backup error: {0}")]
    Backup(#[from] BackupError),

    #[error("Restore error: {0}")]
    Restore(#[from] RestoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum BackupError {
    /// A referenced file is missing or cannot be opened. Never fatal for a backup run.
    #[error("File unreadable '{path}': {source}")]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write record dump '{path}': {reason}")]
    RecordDump { path: PathBuf, reason: String },

    #[error("Failed to write manifest '{path}': {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("Failed to create archive '{path}': {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error("A backup is already running")]
    AlreadyRunning,

    #[error("Backup job not found: {0}")]
    NotFound(String),

    #[error("Backup job {id} is {status}, expected completed")]
    NotCompleted { id: String, status: String },

    #[error("Archive for backup job {id} is missing at '{path}'")]
    ArchiveMissing { id: String, path: PathBuf },

    #[error("Illegal backup status transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },
}

#[derive(Error, Debug)]
pub enum RestoreError {
    /// Malformed or missing manifest, unreadable package or digest mismatch.
    #[error("Package validation failed: {0}")]
    Validation(String),

    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A restored copy does not hash to the digest recorded in the manifest.
    #[error("Integrity check failed for '{path}': expected {expected}, got {actual}")]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Malformed record in '{dump}' line {line}: {reason}")]
    MalformedRecord {
        dump: String,
        line: usize,
        reason: String,
    },

    #[error("A restore is already active")]
    AlreadyRunning,

    #[error("Restore log not found: {0}")]
    NotFound(String),

    #[error("Illegal restore status transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy file from '{from}' to '{to}': {source}")]
    CopyFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No free file name near '{0}'")]
    FileExists(PathBuf),

    #[error("Path escapes its root: {0}")]
    UnsafePath(PathBuf),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, DocvaultError>;
