//! Bounded wait for exclusive access to the source file.

use std::fs::{File, OpenOptions, TryLockError};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::TransformError;

/// Retry policy for taking the exclusive lock.
#[derive(Debug, Clone, Copy)]
pub struct LockPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl LockPolicy {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self {
            retries: retries.max(1),
            backoff,
        }
    }
}

impl From<&sealdb_core::config::TransformConfig> for LockPolicy {
    fn from(config: &sealdb_core::config::TransformConfig) -> Self {
        Self::new(
            config.lock_retries,
            Duration::from_millis(config.lock_backoff_ms),
        )
    }
}

/// Block until `path` can be opened read-write and locked exclusively, then
/// release the lock. Nothing is written to the file.
pub fn wait_for_exclusive(path: &Path, policy: LockPolicy) -> Result<(), TransformError> {
    for attempt in 1..=policy.retries {
        match try_exclusive(path) {
            Ok(file) => {
                drop(file);
                tracing::debug!(path = %path.display(), attempt, "source is free");
                return Ok(());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransformError::SourceMissing(path.to_path_buf()));
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), attempt, "source busy: {e}");
            }
        }
        if attempt < policy.retries {
            thread::sleep(policy.backoff);
        }
    }

    tracing::warn!(
        path = %path.display(),
        attempts = policy.retries,
        "gave up waiting for exclusive access"
    );
    Err(TransformError::LockTimeout {
        path: path.to_path_buf(),
        attempts: policy.retries,
    })
}

fn try_exclusive(path: &Path) -> std::io::Result<File> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => Err(std::io::Error::new(
            std::io::ErrorKind::WouldBlock,
            "locked by another handle",
        )),
        Err(TryLockError::Error(e)) => Err(e),
    }
}
