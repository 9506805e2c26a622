//! Persisted verification record (`verification_status.json`).

use std::path::Path;

use chrono::{DateTime, Utc};
use sealdb_core::GateState;
use serde::{Deserialize, Serialize};

use crate::GateError;

/// File name of the record inside the data dir
pub const RECORD_FILE: &str = "verification_status.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    /// Uppercase hex SHA-256 of the outstanding code
    pub code_hash: Option<String>,
    /// Unix epoch when no code is outstanding
    pub expires_at: DateTime<Utc>,
    pub is_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
}

impl Default for VerificationRecord {
    fn default() -> Self {
        Self {
            code_hash: None,
            expires_at: DateTime::<Utc>::UNIX_EPOCH,
            is_verified: false,
            verified_at: None,
        }
    }
}

impl VerificationRecord {
    pub fn state(&self) -> GateState {
        if self.is_verified {
            GateState::Verified
        } else if self.code_hash.is_some() {
            GateState::CodeIssued
        } else {
            GateState::Unverified
        }
    }

    /// Read the record, `None` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, GateError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(GateError::Io(e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| GateError::Corrupt(format!("{}: {e}", path.display())))
    }

    /// Write the record atomically (temp + rename).
    pub fn save(&self, path: &Path) -> Result<(), GateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| GateError::Corrupt(format!("serializing record: {e}")))?;

        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
