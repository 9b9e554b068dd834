//! Single-flight leases: at most one running backup and one active restore.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::broadcast::TaskKind;

#[derive(Clone, Default)]
pub struct JobLeases {
    backup: Arc<AtomicBool>,
    restore: Arc<AtomicBool>,
}

impl JobLeases {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, kind: TaskKind) -> &Arc<AtomicBool> {
        match kind {
            TaskKind::Backup => &self.backup,
            TaskKind::Restore => &self.restore,
        }
    }

    /// Takes the lease for `kind`, or `None` if another task holds it.
    pub fn try_acquire(&self, kind: TaskKind) -> Option<LeaseGuard> {
        let flag = self.flag(kind);
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LeaseGuard {
                flag: Arc::clone(flag),
                kind,
            })
    }

    pub fn is_held(&self, kind: TaskKind) -> bool {
        self.flag(kind).load(Ordering::Acquire)
    }
}

/// Held for the lifetime of one task; releases the lease on drop.
#[derive(Debug)]
pub struct LeaseGuard {
    flag: Arc<AtomicBool>,
    kind: TaskKind,
}

impl LeaseGuard {
    pub fn kind(&self) -> TaskKind {
        self.kind
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
