//! Change-set selection.

use chrono::{DateTime, Utc};

use crate::backup::types::PendingSummary;
use crate::db::{record_repo, Database, DatabaseError};
use crate::records::{Document, DocumentVersion, Signature};

/// Records of every kind changed after a reference time.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub since: Option<DateTime<Utc>>,
    pub documents: Vec<Document>,
    pub versions: Vec<DocumentVersion>,
    pub signatures: Vec<Signature>,
}

impl ChangeSet {
    pub fn record_count(&self) -> usize {
        self.documents.len() + self.versions.len() + self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }
}

/// Read-only selector over the record store.
pub struct ChangeSetSelector<'a> {
    db: &'a Database,
}

impl<'a> ChangeSetSelector<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Everything created, modified or (for signatures) reverted strictly
    /// after `since`; with no `since`, every record.
    pub fn select(&self, since: Option<DateTime<Utc>>) -> Result<ChangeSet, DatabaseError> {
        Ok(ChangeSet {
            since,
            documents: record_repo::changed_since(self.db, since)?,
            versions: record_repo::changed_since(self.db, since)?,
            signatures: record_repo::changed_since(self.db, since)?,
        })
    }

    /// Counts of what [`select`](Self::select) would return.
    pub fn pending_counts(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<PendingSummary, DatabaseError> {
        Ok(PendingSummary {
            since,
            documents: record_repo::count_changed_since::<Document>(self.db, since)?,
            versions: record_repo::count_changed_since::<DocumentVersion>(self.db, since)?,
            signatures: record_repo::count_changed_since::<Signature>(self.db, since)?,
        })
    }
}
