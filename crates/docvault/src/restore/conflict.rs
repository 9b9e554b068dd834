use chrono::{DateTime, Utc};

/// Which side of a conflict survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Overwrite the live row with the archived one.
    Incoming,
    /// Leave the live row untouched.
    Existing,
}

/// Decides between a live record and an archived record with the same id.
pub trait ConflictStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self, existing: DateTime<Utc>, incoming: DateTime<Utc>) -> Resolution;
}

/// The archived record wins only when it is strictly newer. Ties keep the
/// live row, which makes a repeated restore a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl ConflictStrategy for LastWriteWins {
    fn name(&self) -> &'static str {
        "last_write_wins"
    }

    fn resolve(&self, existing: DateTime<Utc>, incoming: DateTime<Utc>) -> Resolution {
        if incoming > existing {
            Resolution::Incoming
        } else {
            Resolution::Existing
        }
    }
}
