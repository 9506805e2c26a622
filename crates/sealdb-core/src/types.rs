use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a database transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformDirection {
    /// Plaintext SQLite → SQLCipher
    Encrypt,
    /// SQLCipher → plaintext SQLite
    Decrypt,
}

impl fmt::Display for TransformDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformDirection::Encrypt => f.write_str("encrypt"),
            TransformDirection::Decrypt => f.write_str("decrypt"),
        }
    }
}

/// Verification gate state, derived from the persisted record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Unverified,
    /// A code is outstanding (it may already have expired)
    CodeIssued,
    Verified,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateState::Unverified => f.write_str("unverified"),
            GateState::CodeIssued => f.write_str("code issued"),
            GateState::Verified => f.write_str("verified"),
        }
    }
}

/// Boundary result of a transform: success flag plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOutcome {
    pub ok: bool,
    pub message: String,
}

impl TransformOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}
