//! Restore repository: restore logs and their step events.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{
    format_timestamp, get_optional_timestamp, get_timestamp, invalid_column, Database,
    DatabaseError,
};
use crate::restore::types::{RestoreLog, RestoreStatus, StepEvent, StepKind, StepPhase};

fn log_from_row(row: &Row<'_>) -> Result<RestoreLog, rusqlite::Error> {
    let status: String = row.get("status")?;
    let status =
        RestoreStatus::parse(&status).ok_or_else(|| invalid_column(row, "status", status))?;
    let emergency: i64 = row.get("emergency")?;

    Ok(RestoreLog {
        id: row.get("id")?,
        backup_job_id: row.get("backup_job_id")?,
        archive_path: row.get("archive_path")?,
        status,
        total_records: row.get("total_records")?,
        restored_records: row.get("restored_records")?,
        total_files: row.get("total_files")?,
        restored_files: row.get("restored_files")?,
        skipped_files: row.get("skipped_files")?,
        error_message: row.get("error_message")?,
        creator: row.get("creator")?,
        emergency: emergency != 0,
        created_at: get_timestamp(row, "created_at")?,
        completed_at: get_optional_timestamp(row, "completed_at")?,
    })
}

fn step_from_row(row: &Row<'_>) -> Result<StepEvent, rusqlite::Error> {
    let phase: String = row.get("phase")?;
    let phase = StepPhase::parse(&phase).ok_or_else(|| invalid_column(row, "phase", phase))?;
    let step: String = row.get("step")?;
    let step = StepKind::parse(&step).ok_or_else(|| invalid_column(row, "step", step))?;

    Ok(StepEvent {
        phase,
        step,
        entity_type: row.get("entity_type")?,
        entity_id: row.get("entity_id")?,
        detail: row.get("detail")?,
        recorded_at: get_timestamp(row, "recorded_at")?,
    })
}

/// Query filter parameters for restore log listing.
#[derive(Debug, Default, Clone)]
pub struct RestoreLogFilter {
    pub status: Option<RestoreStatus>,
    pub backup_job_id: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new restore log.
pub fn insert_log(db: &Database, log: &RestoreLog) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO restore_logs (id, backup_job_id, archive_path, status, total_records,
             restored_records, total_files, restored_files, skipped_files, error_message,
             creator, emergency, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                log.id,
                log.backup_job_id,
                log.archive_path,
                log.status.as_str(),
                log.total_records,
                log.restored_records,
                log.total_files,
                log.restored_files,
                log.skipped_files,
                log.error_message,
                log.creator,
                log.emergency as i64,
                format_timestamp(log.created_at),
                log.completed_at.map(format_timestamp),
            ],
        )?;
        Ok(())
    })
}

/// Persists status, counters and outcome of a restore log.
pub fn update_log(db: &Database, log: &RestoreLog) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE restore_logs SET backup_job_id=?2, status=?3, total_records=?4,
             restored_records=?5, total_files=?6, restored_files=?7, skipped_files=?8,
             error_message=?9, completed_at=?10
             WHERE id=?1",
            params![
                log.id,
                log.backup_job_id,
                log.status.as_str(),
                log.total_records,
                log.restored_records,
                log.total_files,
                log.restored_files,
                log.skipped_files,
                log.error_message,
                log.completed_at.map(format_timestamp),
            ],
        )?;
        Ok(())
    })
}

/// Finds a restore log by its ID.
pub fn find_log(db: &Database, id: &str) -> Result<Option<RestoreLog>, DatabaseError> {
    db.with_conn(|conn| {
        let log = conn
            .query_row(
                "SELECT * FROM restore_logs WHERE id = ?1",
                params![id],
                log_from_row,
            )
            .optional()?;
        Ok(log)
    })
}

/// Queries restore logs newest first, returning (rows, total_count).
pub fn query_logs(
    db: &Database,
    filter: &RestoreLogFilter,
) -> Result<(Vec<RestoreLog>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let status = filter.status.map(|s| s.as_str());
        let job = filter.backup_job_id.as_deref();
        let total: u64 = conn.query_row(
            "SELECT COUNT(*) FROM restore_logs
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR backup_job_id = ?2)",
            params![status, job],
            |r| r.get(0),
        )?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        let mut stmt = conn.prepare(
            "SELECT * FROM restore_logs
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR backup_job_id = ?2)
             ORDER BY created_at DESC LIMIT ?3 OFFSET ?4",
        )?;
        let rows = stmt
            .query_map(params![status, job, limit, offset], log_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Appends one event to a log's step sequence.
pub fn append_step(db: &Database, log_id: &str, event: &StepEvent) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO restore_steps (log_id, phase, step, entity_type, entity_id, detail,
             recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                log_id,
                event.phase.as_str(),
                event.step.as_str(),
                event.entity_type,
                event.entity_id,
                event.detail,
                format_timestamp(event.recorded_at),
            ],
        )?;
        Ok(())
    })
}

/// All step events of a log in the order they were appended, optionally
/// limited to one phase.
pub fn steps_for_log(
    db: &Database,
    log_id: &str,
    phase: Option<StepPhase>,
) -> Result<Vec<StepEvent>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM restore_steps WHERE log_id = ?1 AND (?2 IS NULL OR phase = ?2)
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![log_id, phase.map(|p| p.as_str())], step_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Marks restore logs left in a live state by a previous process as failed.
pub fn fail_interrupted(db: &Database, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE restore_logs SET status = 'failed', completed_at = ?1,
             error_message = 'interrupted before completion'
             WHERE status NOT IN ('completed', 'failed')",
            params![format_timestamp(now)],
        )?;
        Ok(changed)
    })
}
