pub mod filesystem;

pub use filesystem::{FileStorage, WorkDir, WorkKind};
