//! Replays record dumps into the live database.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, info};

use crate::db::record_repo::{self, RecordTable};
use crate::db::Database;
use crate::error::{RestoreError, Result};
use crate::records::{Document, DocumentVersion, ForeignKey, Record, Signature};
use crate::restore::conflict::{ConflictStrategy, Resolution};
use crate::restore::journal::Journal;
use crate::restore::types::{StepEvent, StepKind, StepPhase};

/// Which references a new row must satisfy before it is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPolicy {
    /// Every referenced row must exist.
    Standard,
    /// Only structural references are required; advisory ones such as the
    /// creating user may dangle.
    Emergency,
}

impl InsertPolicy {
    fn requires(&self, key: &ForeignKey) -> bool {
        match self {
            InsertPolicy::Standard => true,
            InsertPolicy::Emergency => key.structural,
        }
    }
}

pub struct DbRestorer<'a> {
    db: &'a Database,
    strategy: &'a dyn ConflictStrategy,
    policy: InsertPolicy,
}

impl<'a> DbRestorer<'a> {
    pub fn new(
        db: &'a Database,
        strategy: &'a dyn ConflictStrategy,
        policy: InsertPolicy,
    ) -> Self {
        Self {
            db,
            strategy,
            policy,
        }
    }

    /// Replays every dump under `extracted`, parents before children.
    pub fn restore(&self, extracted: &Path, journal: &mut Journal<'_>) -> Result<()> {
        self.replay::<Document>(extracted, journal)?;
        self.replay::<DocumentVersion>(extracted, journal)?;
        self.replay::<Signature>(extracted, journal)?;
        info!(
            "Database phase done: {} records applied",
            journal.log.restored_records
        );
        Ok(())
    }

    fn replay<R: RecordTable>(&self, extracted: &Path, journal: &mut Journal<'_>) -> Result<()> {
        let dump = R::KIND.dump_path();
        let path = extracted.join(&dump);
        if !path.is_file() {
            // Reported as a validation warning already.
            debug!("No dump for {}", R::KIND);
            return Ok(());
        }

        let file = File::open(&path).map_err(|e| RestoreError::Io {
            path: path.clone(),
            source: e,
        })?;
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| RestoreError::Io {
                path: path.clone(),
                source: e,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let incoming: R =
                serde_json::from_str(&line).map_err(|e| RestoreError::MalformedRecord {
                    dump: dump.clone(),
                    line: index + 1,
                    reason: e.to_string(),
                })?;
            self.apply(&incoming, journal)?;
        }
        Ok(())
    }

    fn apply<R: RecordTable>(&self, incoming: &R, journal: &mut Journal<'_>) -> Result<()> {
        let entity = R::KIND.as_str();
        let id = incoming.id();

        if let Some(existing) = record_repo::find::<R>(self.db, id)? {
            return match self
                .strategy
                .resolve(existing.modified_at(), incoming.modified_at())
            {
                Resolution::Incoming => {
                    record_repo::update(self.db, incoming)?;
                    journal.log.restored_records += 1;
                    journal.save()?;
                    journal.step(
                        StepEvent::new(
                            StepPhase::Restore,
                            StepKind::RecordUpdated,
                            format!(
                                "archived copy modified {} is newer than live {}",
                                incoming.modified_at().to_rfc3339(),
                                existing.modified_at().to_rfc3339()
                            ),
                        )
                        .for_entity(entity, id),
                    )
                }
                Resolution::Existing => journal.step(
                    StepEvent::new(
                        StepPhase::Restore,
                        StepKind::RecordKept,
                        format!("live row is not older ({})", self.strategy.name()),
                    )
                    .for_entity(entity, id),
                ),
            };
        }

        let missing = self.missing_references(incoming)?;
        if !missing.is_empty() {
            return journal.step(
                StepEvent::new(
                    StepPhase::Restore,
                    StepKind::OrphanSkipped,
                    format!("missing referenced rows: {}", missing.join(", ")),
                )
                .for_entity(entity, id),
            );
        }

        record_repo::insert(self.db, incoming)?;
        journal.log.restored_records += 1;
        journal.save()?;
        journal.step(
            StepEvent::new(StepPhase::Restore, StepKind::RecordInserted, "inserted")
                .for_entity(entity, id),
        )
    }

    /// References the policy requires that do not resolve, as `table/id`.
    fn missing_references<R: Record>(&self, record: &R) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for key in record.foreign_keys() {
            if !self.policy.requires(&key) {
                continue;
            }
            if !record_repo::exists(self.db, key.table, &key.id)? {
                missing.push(format!("{}/{}", key.table.table_name(), key.id));
            }
        }
        Ok(missing)
    }
}
