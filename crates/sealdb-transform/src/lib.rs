//! sealdb-transform: in-place encryption state changes of the database file
//!
//! Transform sequence:
//!   1. Enter maintenance (fail fast if another transform is running)
//!   2. Wait for exclusive access to the source (bounded retries)
//!   3. Probe the current state; refuse a no-op or a wrong key
//!   4. Move any stale scratch file aside, export into the scratch file
//!   5. Rename the scratch file over the source
//!
//! On failure the source is left as it was and partial output is moved into
//! the backup directory.

pub mod backup;
pub mod engine;
pub mod lock;
pub mod maintenance;
pub mod probe;

use std::path::PathBuf;

pub use engine::{TransformEngine, TransformReport};
pub use lock::LockPolicy;
pub use maintenance::{MaintenanceGuard, MaintenanceMode, MaintenanceStatus};

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("database maintenance is already in progress")]
    MaintenanceInProgress,

    #[error("source database not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("timed out waiting for exclusive access to {} after {attempts} attempts", path.display())]
    LockTimeout { path: PathBuf, attempts: u32 },

    #[error("database is already {state}")]
    AlreadyInTargetState { state: &'static str },

    #[error("incorrect key: the database cannot be opened with it")]
    IncorrectKey,

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
