//! Gated, keyed database connections.
//!
//! Every connection to the live database goes through `open_keyed`, which
//! refuses while the installation is unverified or a transform is running.

use std::path::Path;

use rusqlite::Connection;
use sealdb_gate::VerificationGate;
use sealdb_secrets::KeyError;
use sealdb_transform::{probe, MaintenanceStatus};
use secrecy::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("database access requires a verified installation")]
    NotVerified,

    #[error("database maintenance is in progress")]
    MaintenanceInProgress,

    #[error("incorrect key: the database cannot be opened with it")]
    IncorrectKey,

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Open `path` with `key` applied, after checking the gate and maintenance.
pub fn open_keyed(
    path: &Path,
    key: &SecretString,
    gate: &VerificationGate,
    maintenance: &MaintenanceStatus,
) -> Result<Connection, AccessError> {
    if maintenance.is_active() {
        tracing::warn!(path = %path.display(), "database open refused: maintenance in progress");
        return Err(AccessError::MaintenanceInProgress);
    }
    if !gate.is_verification_completed() {
        tracing::warn!(path = %path.display(), "database open refused: not verified");
        return Err(AccessError::NotVerified);
    }

    let conn = Connection::open(path)?;
    probe::apply_key(&conn, key)?;
    match conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    }) {
        Ok(_) => {
            tracing::debug!(path = %path.display(), "keyed connection opened");
            Ok(conn)
        }
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::NotADatabase =>
        {
            Err(AccessError::IncorrectKey)
        }
        Err(e) => Err(AccessError::Sqlite(e)),
    }
}
