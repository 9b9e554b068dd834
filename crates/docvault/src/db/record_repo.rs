//! Record repository: reads and writes the document-management tables.
//!
//! The backup engine only needs a narrow slice of the record store: change
//! detection by timestamp, lookups by id, plain inserts/updates during a
//! restore, and existence checks for foreign-key targets.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, get_optional_timestamp, get_timestamp, Database, DatabaseError};
use crate::records::{Document, DocumentVersion, ForeignTable, Record, RecordKind, Signature};

/// Table access for a record type.
pub trait RecordTable: Record {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    fn select_by_id_sql() -> &'static str;

    /// Selects rows changed after `?1`, or every row when `?1` is NULL.
    fn select_changed_sql() -> &'static str;

    fn count_changed_sql() -> &'static str;

    fn insert_row(&self, conn: &Connection) -> rusqlite::Result<usize>;

    fn update_row(&self, conn: &Connection) -> rusqlite::Result<usize>;
}

impl RecordTable for Document {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            archivador_id: row.get("archivador_id")?,
            document_type_id: row.get("document_type_id")?,
            office_id: row.get("office_id")?,
            created_by: row.get("created_by")?,
            file_path: row.get("file_path")?,
            file_name: row.get("file_name")?,
            created_at: get_timestamp(row, "created_at")?,
            updated_at: get_timestamp(row, "updated_at")?,
        })
    }

    fn select_by_id_sql() -> &'static str {
        "SELECT * FROM documents WHERE id = ?1"
    }

    fn select_changed_sql() -> &'static str {
        "SELECT * FROM documents
         WHERE ?1 IS NULL OR created_at > ?1 OR updated_at > ?1
         ORDER BY updated_at, id"
    }

    fn count_changed_sql() -> &'static str {
        "SELECT COUNT(*) FROM documents
         WHERE ?1 IS NULL OR created_at > ?1 OR updated_at > ?1"
    }

    fn insert_row(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO documents (id, title, archivador_id, document_type_id, office_id,
             created_by, file_path, file_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                self.id,
                self.title,
                self.archivador_id,
                self.document_type_id,
                self.office_id,
                self.created_by,
                self.file_path,
                self.file_name,
                format_timestamp(self.created_at),
                format_timestamp(self.updated_at),
            ],
        )
    }

    fn update_row(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE documents SET title=?2, archivador_id=?3, document_type_id=?4, office_id=?5,
             created_by=?6, file_path=?7, file_name=?8, created_at=?9, updated_at=?10
             WHERE id=?1",
            params![
                self.id,
                self.title,
                self.archivador_id,
                self.document_type_id,
                self.office_id,
                self.created_by,
                self.file_path,
                self.file_name,
                format_timestamp(self.created_at),
                format_timestamp(self.updated_at),
            ],
        )
    }
}

impl RecordTable for DocumentVersion {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            version_number: row.get("version_number")?,
            file_path: row.get("file_path")?,
            file_name: row.get("file_name")?,
            created_at: get_timestamp(row, "created_at")?,
            updated_at: get_timestamp(row, "updated_at")?,
        })
    }

    fn select_by_id_sql() -> &'static str {
        "SELECT * FROM document_versions WHERE id = ?1"
    }

    fn select_changed_sql() -> &'static str {
        "SELECT * FROM document_versions
         WHERE ?1 IS NULL OR created_at > ?1 OR updated_at > ?1
         ORDER BY updated_at, id"
    }

    fn count_changed_sql() -> &'static str {
        "SELECT COUNT(*) FROM document_versions
         WHERE ?1 IS NULL OR created_at > ?1 OR updated_at > ?1"
    }

    fn insert_row(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO document_versions (id, document_id, version_number, file_path,
             file_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.id,
                self.document_id,
                self.version_number,
                self.file_path,
                self.file_name,
                format_timestamp(self.created_at),
                format_timestamp(self.updated_at),
            ],
        )
    }

    fn update_row(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE document_versions SET document_id=?2, version_number=?3, file_path=?4,
             file_name=?5, created_at=?6, updated_at=?7
             WHERE id=?1",
            params![
                self.id,
                self.document_id,
                self.version_number,
                self.file_path,
                self.file_name,
                format_timestamp(self.created_at),
                format_timestamp(self.updated_at),
            ],
        )
    }
}

impl RecordTable for Signature {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            signer_id: row.get("signer_id")?,
            signed_at: get_timestamp(row, "signed_at")?,
            reverted_at: get_optional_timestamp(row, "reverted_at")?,
            created_at: get_timestamp(row, "created_at")?,
            updated_at: get_timestamp(row, "updated_at")?,
        })
    }

    fn select_by_id_sql() -> &'static str {
        "SELECT * FROM signatures WHERE id = ?1"
    }

    fn select_changed_sql() -> &'static str {
        "SELECT * FROM signatures
         WHERE ?1 IS NULL OR created_at > ?1 OR updated_at > ?1 OR reverted_at > ?1
         ORDER BY updated_at, id"
    }

    fn count_changed_sql() -> &'static str {
        "SELECT COUNT(*) FROM signatures
         WHERE ?1 IS NULL OR created_at > ?1 OR updated_at > ?1 OR reverted_at > ?1"
    }

    fn insert_row(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO signatures (id, document_id, signer_id, signed_at, reverted_at,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.id,
                self.document_id,
                self.signer_id,
                format_timestamp(self.signed_at),
                self.reverted_at.map(format_timestamp),
                format_timestamp(self.created_at),
                format_timestamp(self.updated_at),
            ],
        )
    }

    fn update_row(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE signatures SET document_id=?2, signer_id=?3, signed_at=?4, reverted_at=?5,
             created_at=?6, updated_at=?7
             WHERE id=?1",
            params![
                self.id,
                self.document_id,
                self.signer_id,
                format_timestamp(self.signed_at),
                self.reverted_at.map(format_timestamp),
                format_timestamp(self.created_at),
                format_timestamp(self.updated_at),
            ],
        )
    }
}

/// Finds a record by id.
pub fn find<R: RecordTable>(db: &Database, id: &str) -> Result<Option<R>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(R::select_by_id_sql(), params![id], R::from_row)
            .optional()?;
        Ok(row)
    })
}

/// Inserts a new record row.
pub fn insert<R: RecordTable>(db: &Database, record: &R) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        record.insert_row(conn)?;
        Ok(())
    })
}

/// Overwrites every column of an existing record row.
pub fn update<R: RecordTable>(db: &Database, record: &R) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        record.update_row(conn)?;
        Ok(())
    })
}

/// Returns records created, modified (or, for signatures, reverted) strictly
/// after `since`. With no `since`, returns every record of the type.
pub fn changed_since<R: RecordTable>(
    db: &Database,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<R>, DatabaseError> {
    let since = since.map(format_timestamp);
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(R::select_changed_sql())?;
        let rows = stmt
            .query_map(params![since], R::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts what `changed_since` would return without loading the rows.
pub fn count_changed_since<R: RecordTable>(
    db: &Database,
    since: Option<DateTime<Utc>>,
) -> Result<u64, DatabaseError> {
    let since = since.map(format_timestamp);
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(R::count_changed_sql(), params![since], |r| r.get(0))?;
        Ok(count)
    })
}

/// Returns true if `table` contains a row with the given id.
pub fn exists(db: &Database, table: ForeignTable, id: &str) -> Result<bool, DatabaseError> {
    // Table names come from a closed enum, never from input.
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)",
        table.table_name()
    );
    db.with_conn(|conn| {
        let found: bool = conn.query_row(&sql, params![id], |r| r.get(0))?;
        Ok(found)
    })
}

/// Every file path referenced by a document or a document version.
pub fn all_file_paths(db: &Database) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT file_path FROM documents WHERE file_path IS NOT NULL
             UNION
             SELECT file_path FROM document_versions WHERE file_path IS NOT NULL",
        )?;
        let paths = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(paths)
    })
}

/// Counts records of a kind regardless of timestamps.
pub fn count(db: &Database, kind: RecordKind) -> Result<u64, DatabaseError> {
    let sql = format!("SELECT COUNT(*) FROM {}", kind.as_str());
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(count)
    })
}

// ─── Reference tables ───────────────────────────────────────────────────────
//
// Owned by the document-management application. The engine never backs
// them up; these helpers exist so the application (and tests) can seed them.

pub fn insert_user(db: &Database, id: &str, name: &str) -> Result<(), DatabaseError> {
    insert_named(db, "users", id, name)
}

pub fn insert_office(db: &Database, id: &str, name: &str) -> Result<(), DatabaseError> {
    insert_named(db, "offices", id, name)
}

pub fn insert_document_type(db: &Database, id: &str, name: &str) -> Result<(), DatabaseError> {
    insert_named(db, "document_types", id, name)
}

pub fn insert_archivador(
    db: &Database,
    id: &str,
    name: &str,
    office_id: &str,
) -> Result<(), DatabaseError> {
    let now = format_timestamp(Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO archivadores (id, name, office_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![id, name, office_id, now],
        )?;
        Ok(())
    })
}

fn insert_named(
    db: &Database,
    table: &'static str,
    id: &str,
    name: &str,
) -> Result<(), DatabaseError> {
    let now = format_timestamp(Utc::now());
    let sql = format!(
        "INSERT OR IGNORE INTO {} (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        table
    );
    db.with_conn(|conn| {
        conn.execute(&sql, params![id, name, now])?;
        Ok(())
    })
}
