//! Persistence of a running restore: status, counters and step events.

use chrono::Utc;
use tracing::debug;

use crate::broadcast::{Counters, Phase, ProgressReporter, TaskKind};
use crate::context::EngineContext;
use crate::db::restore_repo;
use crate::error::{RestoreError, Result};
use crate::restore::types::{RestoreLog, RestoreStatus, StepEvent, StepKind, StepPhase};
use crate::sinks::AuditEvent;

/// Owns the log row of one restore while it runs. Counters are written back
/// after every change so an interrupted restore is described exactly.
pub struct Journal<'a> {
    ctx: &'a EngineContext,
    progress: &'a dyn ProgressReporter,
    pub log: RestoreLog,
}

impl<'a> Journal<'a> {
    pub fn new(
        ctx: &'a EngineContext,
        log: RestoreLog,
        progress: &'a dyn ProgressReporter,
    ) -> Self {
        Self { ctx, progress, log }
    }

    pub fn step(&self, event: StepEvent) -> Result<()> {
        debug!("{}: {}", event.step.as_str(), event.detail);
        restore_repo::append_step(&self.ctx.db, &self.log.id, &event)?;
        Ok(())
    }

    /// Writes the log row and publishes the current counters.
    pub fn save(&self) -> Result<()> {
        restore_repo::update_log(&self.ctx.db, &self.log)?;
        self.progress.counters(phase_of(self.log.status), self.counters());
        Ok(())
    }

    /// Applies a checked status change, persists it and records it in the
    /// step log and the audit trail.
    pub fn transition(&mut self, next: RestoreStatus) -> Result<()> {
        if !self.log.status.can_transition_to(next) {
            return Err(RestoreError::IllegalTransition {
                from: self.log.status.to_string(),
                to: next.to_string(),
            }
            .into());
        }

        let from = self.log.status;
        self.log.status = next;
        if next.is_terminal() {
            self.log.completed_at = Some(Utc::now());
        }
        restore_repo::update_log(&self.ctx.db, &self.log)?;

        let phase = match from {
            RestoreStatus::Pending | RestoreStatus::Validating => StepPhase::Validation,
            _ => StepPhase::Restore,
        };
        self.step(StepEvent::new(
            phase,
            StepKind::Transition,
            format!("{} -> {}", from, next),
        ))?;
        let mut event = AuditEvent::new(TaskKind::Restore, &self.log.id, next.as_str())
            .by(self.log.creator.as_deref());
        if let (RestoreStatus::Failed, Some(message)) = (next, &self.log.error_message) {
            event = event.with_detail(message.clone());
        }
        self.ctx.audit.record(event);
        self.progress.phase(phase_of(next), &phase_of(next).to_string());
        Ok(())
    }

    /// Records `message` and moves to `Failed` unless already terminal.
    pub fn fail(&mut self, message: &str) -> Result<()> {
        if self.log.status.is_terminal() {
            return Ok(());
        }
        self.log.error_message = Some(message.to_string());
        self.transition(RestoreStatus::Failed)
    }

    pub fn counters(&self) -> Counters {
        Counters {
            total_records: self.log.total_records,
            done_records: self.log.restored_records,
            total_files: self.log.total_files,
            done_files: self.log.restored_files,
            skipped_files: self.log.skipped_files,
        }
    }
}

fn phase_of(status: RestoreStatus) -> Phase {
    match status {
        RestoreStatus::Pending => Phase::Queued,
        RestoreStatus::Validating => Phase::Validating,
        RestoreStatus::RestoringDb => Phase::RestoringDb,
        RestoreStatus::RestoringFiles => Phase::RestoringFiles,
        RestoreStatus::Completed => Phase::Completed,
        RestoreStatus::Failed => Phase::Failed,
    }
}
