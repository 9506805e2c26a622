//! sealdb-gate: one-time email-code verification
//!
//! ```text
//! Unverified ──generate──▶ CodeIssued ──verify(ok)──▶ Verified
//!      ▲                      │  ▲                        │
//!      │                      └──┘ generate (replace)     │
//!      └──────────────────────── reset ◀──────────────────┘
//! ```
//!
//! The plaintext code is returned exactly once; only its SHA-256 is stored.

pub mod clock;
pub mod code;
pub mod gate;
pub mod record;

pub use clock::{Clock, ManualClock, SystemClock};
pub use gate::{IssuedCode, VerificationGate, VerificationStatus, VerifyOutcome};
pub use record::VerificationRecord;

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("installation is already verified")]
    AlreadyVerified,

    #[error("verification record is unreadable: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
