//! Backup repository: CRUD operations for `backup_jobs` and `backup_items`.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    format_timestamp, get_optional_timestamp, get_timestamp, invalid_column, Database,
    DatabaseError,
};
use crate::backup::types::{BackupItem, BackupJob, BackupStatus, ItemType};

fn job_from_row(row: &Row<'_>) -> Result<BackupJob, rusqlite::Error> {
    let status: String = row.get("status")?;
    let status =
        BackupStatus::parse(&status).ok_or_else(|| invalid_column(row, "status", status))?;

    Ok(BackupJob {
        id: row.get("id")?,
        status,
        created_at: get_timestamp(row, "created_at")?,
        started_at: get_optional_timestamp(row, "started_at")?,
        completed_at: get_optional_timestamp(row, "completed_at")?,
        since_date: get_optional_timestamp(row, "since_date")?,
        total_size: row.get("total_size")?,
        record_count: row.get("record_count")?,
        file_count: row.get("file_count")?,
        archive_path: row.get("archive_path")?,
        manifest_path: row.get("manifest_path")?,
        creator: row.get("creator")?,
        requester_ip: row.get("requester_ip")?,
        requester_user_agent: row.get("requester_user_agent")?,
        error_message: row.get("error_message")?,
    })
}

fn item_from_row(row: &Row<'_>) -> Result<BackupItem, rusqlite::Error> {
    let item_type: String = row.get("item_type")?;
    let item_type =
        ItemType::parse(&item_type).ok_or_else(|| invalid_column(row, "item_type", item_type))?;
    let metadata: Option<String> = row.get("metadata")?;
    let metadata = match metadata {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
        })?,
        None => serde_json::Value::Null,
    };

    Ok(BackupItem {
        item_type,
        entity_type: row.get("entity_type")?,
        source_id: row.get("source_id")?,
        content_hash: row.get("content_hash")?,
        archive_relative_path: row.get("archive_path")?,
        metadata,
    })
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct BackupJobFilter {
    pub status: Option<BackupStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Where the bytes for a digest can be found in an earlier archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFileLocation {
    pub job_id: String,
    pub archive_path: PathBuf,
    /// Entry name inside the archive.
    pub entry: String,
}

/// Inserts a new job row.
pub fn insert_job(db: &Database, job: &BackupJob) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO backup_jobs (id, status, created_at, started_at, completed_at,
             since_date, total_size, record_count, file_count, archive_path, manifest_path,
             creator, requester_ip, requester_user_agent, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                job.id,
                job.status.as_str(),
                format_timestamp(job.created_at),
                job.started_at.map(format_timestamp),
                job.completed_at.map(format_timestamp),
                job.since_date.map(format_timestamp),
                job.total_size,
                job.record_count,
                job.file_count,
                job.archive_path,
                job.manifest_path,
                job.creator,
                job.requester_ip,
                job.requester_user_agent,
                job.error_message,
            ],
        )?;
        Ok(())
    })
}

/// Updates an existing job row. All fields except `id` and `created_at` are overwritten.
pub fn update_job(db: &Database, job: &BackupJob) -> Result<(), DatabaseError> {
    db.with_conn(|conn| write_job(conn, job))
}

/// Stores a finished job's items and its final row in one transaction.
pub fn complete_job(
    db: &Database,
    job: &BackupJob,
    items: &[BackupItem],
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        write_items(&tx, &job.id, items)?;
        write_job(&tx, job)?;
        tx.commit()?;
        Ok(())
    })
}

fn write_job(conn: &Connection, job: &BackupJob) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE backup_jobs SET status=?2, started_at=?3, completed_at=?4, since_date=?5,
         total_size=?6, record_count=?7, file_count=?8, archive_path=?9, manifest_path=?10,
         creator=?11, requester_ip=?12, requester_user_agent=?13, error_message=?14
         WHERE id=?1",
        params![
            job.id,
            job.status.as_str(),
            job.started_at.map(format_timestamp),
            job.completed_at.map(format_timestamp),
            job.since_date.map(format_timestamp),
            job.total_size,
            job.record_count,
            job.file_count,
            job.archive_path,
            job.manifest_path,
            job.creator,
            job.requester_ip,
            job.requester_user_agent,
            job.error_message,
        ],
    )?;
    Ok(())
}

/// Finds a job by its ID.
pub fn find_job(db: &Database, id: &str) -> Result<Option<BackupJob>, DatabaseError> {
    db.with_conn(|conn| {
        let job = conn
            .query_row(
                "SELECT * FROM backup_jobs WHERE id = ?1",
                params![id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    })
}

/// Queries jobs newest first, returning (rows, total_count).
pub fn query_jobs(
    db: &Database,
    filter: &BackupJobFilter,
) -> Result<(Vec<BackupJob>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let status = filter.status.map(|s| s.as_str());
        let total: u64 = conn.query_row(
            "SELECT COUNT(*) FROM backup_jobs WHERE ?1 IS NULL OR status = ?1",
            params![status],
            |r| r.get(0),
        )?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        let mut stmt = conn.prepare(
            "SELECT * FROM backup_jobs WHERE ?1 IS NULL OR status = ?1
             ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(params![status, limit, offset], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// The most recently completed job, by completion time.
pub fn latest_completed(db: &Database) -> Result<Option<BackupJob>, DatabaseError> {
    db.with_conn(|conn| {
        let job = conn
            .query_row(
                "SELECT * FROM backup_jobs WHERE status = 'completed'
                 ORDER BY completed_at DESC LIMIT 1",
                [],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    })
}

/// Completed jobs beyond the newest `keep`, newest first.
pub fn completed_beyond(db: &Database, keep: usize) -> Result<Vec<BackupJob>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM backup_jobs WHERE status = 'completed'
             ORDER BY completed_at DESC LIMIT -1 OFFSET ?1",
        )?;
        let rows = stmt
            .query_map(params![keep as i64], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes a job row; its items go with it (`ON DELETE CASCADE`).
pub fn delete_job(db: &Database, id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM backup_jobs WHERE id = ?1", params![id])?;
        Ok(())
    })
}

/// Inserts all items of a job in one transaction.
pub fn insert_items(
    db: &Database,
    job_id: &str,
    items: &[BackupItem],
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        write_items(&tx, job_id, items)?;
        tx.commit()?;
        Ok(())
    })
}

fn write_items(
    conn: &Connection,
    job_id: &str,
    items: &[BackupItem],
) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO backup_items (job_id, item_type, entity_type, source_id,
         content_hash, archive_path, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for item in items {
        let metadata = if item.metadata.is_null() {
            None
        } else {
            Some(serde_json::to_string(&item.metadata)?)
        };
        stmt.execute(params![
            job_id,
            item.item_type.as_str(),
            item.entity_type,
            item.source_id,
            item.content_hash,
            item.archive_relative_path,
            metadata,
        ])?;
    }
    Ok(())
}

/// All items of a job, in insertion order.
pub fn items_for_job(db: &Database, job_id: &str) -> Result<Vec<BackupItem>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM backup_items WHERE job_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![job_id], item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Distinct non-null digests recorded by a job's items.
pub fn content_hashes_for_job(
    db: &Database,
    job_id: &str,
) -> Result<HashSet<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT content_hash FROM backup_items
             WHERE job_id = ?1 AND content_hash IS NOT NULL",
        )?;
        let hashes = stmt
            .query_map(params![job_id], |r| r.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(hashes)
    })
}

/// Finds the newest retained archive that physically stores `hash`.
pub fn find_stored_file(
    db: &Database,
    hash: &str,
) -> Result<Option<StoredFileLocation>, DatabaseError> {
    db.with_conn(|conn| {
        let location = conn
            .query_row(
                "SELECT j.id, j.archive_path, i.archive_path
                 FROM backup_items i JOIN backup_jobs j ON j.id = i.job_id
                 WHERE i.item_type = 'file' AND i.content_hash = ?1
                   AND j.status = 'completed' AND j.archive_path IS NOT NULL
                   AND i.archive_path IS NOT NULL
                 ORDER BY j.completed_at DESC LIMIT 1",
                params![hash],
                |r| {
                    Ok(StoredFileLocation {
                        job_id: r.get(0)?,
                        archive_path: PathBuf::from(r.get::<_, String>(1)?),
                        entry: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(location)
    })
}

/// Marks jobs left `pending`/`running` by a previous process as failed.
pub fn fail_interrupted(db: &Database, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE backup_jobs SET status = 'failed', completed_at = ?1,
             error_message = 'interrupted before completion'
             WHERE status IN ('pending', 'running')",
            params![format_timestamp(now)],
        )?;
        Ok(changed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::types::BackupRequest;
    use chrono::TimeZone;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn completed_job(id: &str, hour: u32) -> BackupJob {
        let at = Utc.with_ymd_and_hms(2026, 4, 1, hour, 0, 0).unwrap();
        let mut job = BackupJob::pending(id, &BackupRequest::default());
        job.status = BackupStatus::Completed;
        job.created_at = at;
        job.started_at = Some(at);
        job.completed_at = Some(at);
        job.archive_path = Some(format!("/backups/{}.zip", id));
        job
    }

    fn file_item(hash: &str, path: &str) -> BackupItem {
        BackupItem {
            item_type: ItemType::File,
            entity_type: "documents".to_string(),
            source_id: "d1".to_string(),
            content_hash: Some(hash.to_string()),
            archive_relative_path: Some(path.to_string()),
            metadata: serde_json::json!({ "size": 3 }),
        }
    }

    #[test]
    fn test_insert_and_find_job() {
        let db = test_db();
        let request = BackupRequest {
            creator: Some("admin".to_string()),
            requester_ip: Some("10.0.0.4".to_string()),
            requester_user_agent: None,
        };
        let job = BackupJob::pending("j1", &request);
        insert_job(&db, &job).unwrap();

        let found = find_job(&db, "j1").unwrap().unwrap();
        assert_eq!(found.status, BackupStatus::Pending);
        assert_eq!(found.creator.as_deref(), Some("admin"));
        assert!(find_job(&db, "nope").unwrap().is_none());
    }

    #[test]
    fn test_update_job() {
        let db = test_db();
        let mut job = BackupJob::pending("j1", &BackupRequest::default());
        insert_job(&db, &job).unwrap();

        job.status = BackupStatus::Failed;
        job.error_message = Some("disk full".to_string());
        update_job(&db, &job).unwrap();

        let found = find_job(&db, "j1").unwrap().unwrap();
        assert_eq!(found.status, BackupStatus::Failed);
        assert_eq!(found.error_message.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_complete_job_is_atomic() {
        let db = test_db();
        insert_job(&db, &BackupJob::pending("j1", &BackupRequest::default())).unwrap();
        insert_job(&db, &BackupJob::pending("j2", &BackupRequest::default())).unwrap();
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_j2 BEFORE UPDATE ON backup_jobs
                 WHEN NEW.id = 'j2'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        complete_job(&db, &completed_job("j1", 1), &[file_item("h1", "documents/d1/a.pdf")])
            .unwrap();
        assert_eq!(find_job(&db, "j1").unwrap().unwrap().status, BackupStatus::Completed);
        assert_eq!(items_for_job(&db, "j1").unwrap().len(), 1);

        let rejected = complete_job(
            &db,
            &completed_job("j2", 2),
            &[file_item("h2", "documents/d2/b.pdf")],
        );
        assert!(rejected.is_err());
        assert_eq!(find_job(&db, "j2").unwrap().unwrap().status, BackupStatus::Pending);
        assert!(items_for_job(&db, "j2").unwrap().is_empty());
    }

    #[test]
    fn test_latest_completed_and_beyond() {
        let db = test_db();
        for (id, hour) in [("a", 1), ("b", 3), ("c", 2)] {
            insert_job(&db, &completed_job(id, hour)).unwrap();
        }
        insert_job(&db, &BackupJob::pending("p", &BackupRequest::default())).unwrap();

        assert_eq!(latest_completed(&db).unwrap().unwrap().id, "b");

        let beyond: Vec<String> = completed_beyond(&db, 1)
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(beyond, vec!["c", "a"]);
    }

    #[test]
    fn test_query_jobs_with_status_filter() {
        let db = test_db();
        insert_job(&db, &completed_job("a", 1)).unwrap();
        insert_job(&db, &BackupJob::pending("p", &BackupRequest::default())).unwrap();

        let (rows, total) = query_jobs(
            &db,
            &BackupJobFilter {
                status: Some(BackupStatus::Completed),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, "a");

        let (_, total) = query_jobs(&db, &BackupJobFilter::default()).unwrap();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_items_and_hashes() {
        let db = test_db();
        insert_job(&db, &completed_job("a", 1)).unwrap();
        let mut record = file_item("h1", "documents/d1/a.pdf");
        record.item_type = ItemType::DbRecord;
        record.archive_relative_path = None;
        record.metadata = serde_json::Value::Null;
        insert_items(
            &db,
            "a",
            &[
                file_item("h1", "documents/d1/a.pdf"),
                file_item("h2", "documents/d2/b.pdf"),
                record,
            ],
        )
        .unwrap();

        let items = items_for_job(&db, "a").unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].item_type, ItemType::DbRecord);
        assert!(items[2].metadata.is_null());
        assert_eq!(items[0].metadata["size"], 3);

        let hashes = content_hashes_for_job(&db, "a").unwrap();
        assert_eq!(hashes.len(), 2);
        assert!(hashes.contains("h1"));
    }

    #[test]
    fn test_find_stored_file_prefers_newest_archive() {
        let db = test_db();
        insert_job(&db, &completed_job("old", 1)).unwrap();
        insert_job(&db, &completed_job("new", 5)).unwrap();
        insert_items(&db, "old", &[file_item("h1", "documents/d1/a.pdf")]).unwrap();
        insert_items(&db, "new", &[file_item("h1", "documents/d9/a.pdf")]).unwrap();

        let location = find_stored_file(&db, "h1").unwrap().unwrap();
        assert_eq!(location.job_id, "new");
        assert_eq!(location.entry, "documents/d9/a.pdf");
        assert_eq!(location.archive_path, PathBuf::from("/backups/new.zip"));
        assert!(find_stored_file(&db, "h2").unwrap().is_none());
    }

    #[test]
    fn test_delete_job_cascades_items() {
        let db = test_db();
        insert_job(&db, &completed_job("a", 1)).unwrap();
        insert_items(&db, "a", &[file_item("h1", "documents/d1/a.pdf")]).unwrap();

        delete_job(&db, "a").unwrap();
        assert!(items_for_job(&db, "a").unwrap().is_empty());
    }

    #[test]
    fn test_fail_interrupted() {
        let db = test_db();
        insert_job(&db, &BackupJob::pending("p", &BackupRequest::default())).unwrap();
        insert_job(&db, &completed_job("c", 1)).unwrap();

        let changed = fail_interrupted(&db, Utc::now()).unwrap();
        assert_eq!(changed, 1);
        let job = find_job(&db, "p").unwrap().unwrap();
        assert_eq!(job.status, BackupStatus::Failed);
        assert!(job.error_message.is_some());
    }
}
