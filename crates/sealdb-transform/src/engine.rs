use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rusqlite::{params, Connection};
use sealdb_core::config::TransformConfig;
use sealdb_core::TransformDirection;
use secrecy::{ExposeSecret, SecretString};

use crate::backup;
use crate::lock::{self, LockPolicy};
use crate::maintenance::{MaintenanceMode, MaintenanceStatus};
use crate::probe;
use crate::TransformError;

/// What a successful transform did.
#[derive(Debug, Clone)]
pub struct TransformReport {
    pub direction: TransformDirection,
    pub source: PathBuf,
    pub elapsed: Duration,
    /// Stale files moved into the backup dir along the way
    pub relocated: Vec<PathBuf>,
}

/// Converts the database file between plain SQLite and SQLCipher in place.
///
/// At most one transform runs at a time per engine; a second request fails
/// fast instead of queueing.
#[derive(Debug)]
pub struct TransformEngine {
    maintenance: MaintenanceMode,
    lock_policy: LockPolicy,
    backup_dir: PathBuf,
}

impl TransformEngine {
    pub fn new(config: &TransformConfig, backup_dir: impl Into<PathBuf>) -> Self {
        Self::with_policy(LockPolicy::from(config), backup_dir)
    }

    pub fn with_policy(lock_policy: LockPolicy, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            maintenance: MaintenanceMode::new(),
            lock_policy,
            backup_dir: backup_dir.into(),
        }
    }

    /// Read-only handle for subsystems that must stay off the database.
    pub fn status(&self) -> MaintenanceStatus {
        self.maintenance.status()
    }

    pub fn encrypt(
        &self,
        source: &Path,
        scratch: &Path,
        key: &SecretString,
    ) -> Result<TransformReport, TransformError> {
        self.run(TransformDirection::Encrypt, source, scratch, key)
    }

    pub fn decrypt(
        &self,
        source: &Path,
        scratch: &Path,
        key: &SecretString,
    ) -> Result<TransformReport, TransformError> {
        self.run(TransformDirection::Decrypt, source, scratch, key)
    }

    fn run(
        &self,
        direction: TransformDirection,
        source: &Path,
        scratch: &Path,
        key: &SecretString,
    ) -> Result<TransformReport, TransformError> {
        let _guard = self
            .maintenance
            .try_acquire()
            .ok_or(TransformError::MaintenanceInProgress)?;
        let started = Instant::now();

        tracing::info!(%direction, source = %source.display(), "database transform starting");

        if !source.is_file() {
            return Err(TransformError::SourceMissing(source.to_path_buf()));
        }
        if source == scratch {
            return Err(TransformError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "scratch path must differ from the source",
            )));
        }

        lock::wait_for_exclusive(source, self.lock_policy)?;

        let plaintext = probe::is_plaintext(source)?;
        match (direction, plaintext) {
            (TransformDirection::Encrypt, false) => {
                return Err(TransformError::AlreadyInTargetState { state: "encrypted" })
            }
            (TransformDirection::Decrypt, true) => {
                return Err(TransformError::AlreadyInTargetState {
                    state: "decrypted",
                })
            }
            _ => {}
        }
        if direction == TransformDirection::Decrypt && !probe::key_opens(source, key)? {
            tracing::warn!(source = %source.display(), "decrypt refused: key does not open the database");
            return Err(TransformError::IncorrectKey);
        }

        let mut relocated = self.relocate(backup::with_sidecars(scratch), direction)?;

        let exported = match direction {
            TransformDirection::Encrypt => export_encrypted(source, scratch, key),
            TransformDirection::Decrypt => export_plaintext(source, scratch, key),
        };
        if let Err(e) = exported {
            self.park_failed_output(scratch, direction);
            return Err(e);
        }

        // Side files of the old form would be replayed onto the new one.
        let mut source_sidecars = backup::with_sidecars(source);
        source_sidecars.retain(|p| p != source);
        relocated.extend(self.relocate(source_sidecars, direction)?);

        if let Err(e) = std::fs::rename(scratch, source) {
            self.park_failed_output(scratch, direction);
            return Err(TransformError::Io(e));
        }

        let elapsed = started.elapsed();
        tracing::info!(
            %direction,
            source = %source.display(),
            elapsed_ms = elapsed.as_millis() as u64,
            relocated = relocated.len(),
            "database transform complete"
        );
        Ok(TransformReport {
            direction,
            source: source.to_path_buf(),
            elapsed,
            relocated,
        })
    }

    fn relocate(
        &self,
        paths: Vec<PathBuf>,
        direction: TransformDirection,
    ) -> Result<Vec<PathBuf>, TransformError> {
        backup::relocate(&paths, &self.backup_dir, &direction.to_string())
            .map_err(|e| TransformError::Io(std::io::Error::other(format!("{e:#}"))))
    }

    /// Best effort: never leave half-written output next to the live file.
    fn park_failed_output(&self, scratch: &Path, direction: TransformDirection) {
        let remnants = backup::with_sidecars(scratch);
        let label = format!("{direction}-failed");
        match backup::relocate(&remnants, &self.backup_dir, &label) {
            Ok(moved) if !moved.is_empty() => {
                tracing::warn!(count = moved.len(), "failed transform output moved to backups")
            }
            Ok(_) => {}
            Err(e) => tracing::error!(
                scratch = %scratch.display(),
                "could not relocate failed transform output: {e:#}"
            ),
        }
    }
}

fn path_param(path: &Path) -> Result<&str, TransformError> {
    path.to_str().ok_or_else(|| {
        TransformError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path is not valid UTF-8: {}", path.display()),
        ))
    })
}

fn export_encrypted(
    source: &Path,
    scratch: &Path,
    key: &SecretString,
) -> Result<(), TransformError> {
    let conn = Connection::open(source)?;
    conn.execute(
        "ATTACH DATABASE ?1 AS encrypted KEY ?2",
        params![path_param(scratch)?, key.expose_secret()],
    )?;
    conn.query_row("SELECT sqlcipher_export('encrypted')", [], |_| Ok(()))?;
    conn.execute("DETACH DATABASE encrypted", [])?;
    conn.close().map_err(|(_, e)| e)?;
    Ok(())
}

fn export_plaintext(
    source: &Path,
    scratch: &Path,
    key: &SecretString,
) -> Result<(), TransformError> {
    let conn = Connection::open(source)?;
    probe::apply_key(&conn, key)?;
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })
    .map_err(|_| TransformError::IncorrectKey)?;

    conn.execute(
        "ATTACH DATABASE ?1 AS plaintext KEY ''",
        params![path_param(scratch)?],
    )?;
    conn.query_row("SELECT sqlcipher_export('plaintext')", [], |_| Ok(()))?;
    conn.execute("DETACH DATABASE plaintext", [])?;
    conn.close().map_err(|(_, e)| e)?;
    Ok(())
}
