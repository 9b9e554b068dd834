use crate::broadcast::job_progress::{Counters, Phase, ProgressTracker};

/// Updates emitted by the orchestrators while a task runs.
pub enum ProgressUpdate {
    Phase { phase: Phase, message: String },
    Counters { phase: Phase, counters: Counters },
    Completed { message: String, counters: Counters },
    Failed { error: String },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);

    fn phase(&self, phase: Phase, message: &str) {
        self.report(ProgressUpdate::Phase {
            phase,
            message: message.to_string(),
        });
    }

    fn counters(&self, phase: Phase, counters: Counters) {
        self.report(ProgressUpdate::Counters { phase, counters });
    }
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _update: ProgressUpdate) {}
}

/// Bridges orchestrator updates to the broadcast channel.
pub struct BroadcastProgress {
    tracker: ProgressTracker,
}

impl BroadcastProgress {
    pub fn new(tracker: ProgressTracker) -> Self {
        Self { tracker }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, update: ProgressUpdate) {
        match update {
            ProgressUpdate::Phase { phase, message } => {
                self.tracker.update_phase(phase, &message);
            }
            ProgressUpdate::Counters { phase, counters } => {
                self.tracker.update_counters(phase, counters);
            }
            ProgressUpdate::Completed { message, counters } => {
                self.tracker.completed(&message, counters);
            }
            ProgressUpdate::Failed { error } => {
                self.tracker.failed(&error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::job_progress::{ProgressBroadcaster, TaskKind};

    #[test]
    fn test_broadcast_progress_forwards_updates() {
        let broadcaster = ProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let progress = BroadcastProgress::new(broadcaster.start_task("j1", TaskKind::Backup));
        let _ = rx.try_recv();

        progress.phase(Phase::Packaging, "Writing dumps");
        progress.report(ProgressUpdate::Completed {
            message: "done".to_string(),
            counters: Counters {
                done_files: 2,
                ..Default::default()
            },
        });

        assert_eq!(rx.try_recv().unwrap().phase, Phase::Packaging);
        let completed = rx.try_recv().unwrap();
        assert_eq!(completed.phase, Phase::Completed);
        assert_eq!(completed.counters.done_files, 2);
    }
}
