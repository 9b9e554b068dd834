//! Restore side: package validation, record replay, file recovery and the
//! standard and emergency orchestrators.

pub mod conflict;
pub mod db_phase;
pub mod emergency;
pub mod file_phase;
pub mod journal;
pub mod orchestrator;
pub mod types;
pub mod validator;

pub use conflict::{ConflictStrategy, LastWriteWins, Resolution};
pub use db_phase::InsertPolicy;
pub use emergency::EmergencyRestoreOrchestrator;
pub use orchestrator::RestoreOrchestrator;
pub use types::{RestoreDetail, RestoreLog, RestoreStatus, StepEvent, StepKind, StepPhase};
pub use validator::{RestoreValidator, ValidationReport};
