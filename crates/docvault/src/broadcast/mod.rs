//! Broadcasting modules for real-time event streaming.
//!
//! Progress of backup and restore tasks is pushed to any number of
//! subscribers; polling the job/log rows remains the durable source of truth.

pub mod job_progress;
pub mod reporter;

pub use job_progress::{
    Counters, Phase, ProgressBroadcaster, ProgressEvent, ProgressTracker, TaskKind,
};
pub use reporter::{BroadcastProgress, NoopProgress, ProgressReporter, ProgressUpdate};
