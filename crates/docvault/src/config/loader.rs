use std::path::Path;

use crate::config::schema::BackupConfig;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BackupConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<BackupConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: BackupConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express.
pub fn validate_config(config: &BackupConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.max_retained_backups == 0 {
        return Err(ConfigError::Validation {
            message: "max_retained_backups must be at least 1".to_string(),
        });
    }

    if config.hash_chunk_size == 0 {
        return Err(ConfigError::Validation {
            message: "hash_chunk_size must be positive".to_string(),
        });
    }

    if !(0..=9).contains(&config.compression_level) {
        return Err(ConfigError::Validation {
            message: format!(
                "compression_level must be between 0 and 9, got {}",
                config.compression_level
            ),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    // Retention deletes archives and sweeps work dirs; neither may overlap
    // the live tree.
    let data = config.data_dir();
    let backups = config.backup_dir();
    if backups.starts_with(&data) || data.starts_with(&backups) {
        return Err(ConfigError::Validation {
            message: "backup_directory and data_directory must not contain each other"
                .to_string(),
        });
    }
    if config.work_dir().starts_with(&data) {
        return Err(ConfigError::Validation {
            message: "work_directory must not be inside data_directory".to_string(),
        });
    }

    Ok(())
}
