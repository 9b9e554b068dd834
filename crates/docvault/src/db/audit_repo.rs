//! Audit repository: append-only log of job state changes and outcomes.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::{format_timestamp, get_timestamp, Database, DatabaseError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub action: String,
    /// `backup_job` or `restore_log`.
    pub subject_type: String,
    pub subject_id: String,
    pub actor: Option<String>,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

pub fn append(db: &Database, entry: &AuditEntry) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO audit_log (action, subject_type, subject_id, actor, detail, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.action,
                entry.subject_type,
                entry.subject_id,
                entry.actor,
                entry.detail,
                format_timestamp(entry.recorded_at),
            ],
        )?;
        Ok(())
    })
}

/// Entries about one subject, oldest first.
pub fn entries_for(
    db: &Database,
    subject_type: &str,
    subject_id: &str,
) -> Result<Vec<AuditEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM audit_log WHERE subject_type = ?1 AND subject_id = ?2 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![subject_type, subject_id], |row| {
                Ok(AuditEntry {
                    action: row.get("action")?,
                    subject_type: row.get("subject_type")?,
                    subject_id: row.get("subject_id")?,
                    actor: row.get("actor")?,
                    detail: row.get("detail")?,
                    recorded_at: get_timestamp(row, "recorded_at")?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
