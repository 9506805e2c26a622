use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use sealdb_core::config::VerificationConfig;
use sealdb_core::GateState;
use secrecy::{ExposeSecret, SecretString};

use crate::clock::{Clock, SystemClock};
use crate::code::{generate_code, hash_code};
use crate::record::{VerificationRecord, RECORD_FILE};
use crate::GateError;

/// A freshly generated code. The plaintext exists only here.
#[derive(Debug)]
pub struct IssuedCode {
    pub code: SecretString,
    pub expires_at: DateTime<Utc>,
}

/// Why a verification attempt passed or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    AlreadyVerified,
    Expired,
    Mismatch,
    NoCodeIssued,
    /// Too many wrong guesses against the current code
    Throttled,
}

impl VerifyOutcome {
    pub fn passed(self) -> bool {
        matches!(self, VerifyOutcome::Verified | VerifyOutcome::AlreadyVerified)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationStatus {
    pub is_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Attempts {
    failures: u32,
}

/// One-time code verification state machine backed by a JSON record.
///
/// Every read-modify-write holds the in-process mutex. Wrong guesses are
/// counted in memory only, so a mismatch never rewrites the record.
pub struct VerificationGate {
    path: PathBuf,
    ttl: Duration,
    max_attempts: u32,
    clock: Arc<dyn Clock>,
    attempts: Mutex<Attempts>,
}

impl std::fmt::Debug for VerificationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationGate")
            .field("path", &self.path)
            .field("ttl", &self.ttl)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl VerificationGate {
    /// Open the gate in `data_dir`, creating an unverified record if none exists.
    pub fn open(data_dir: &Path, config: &VerificationConfig) -> Result<Self, GateError> {
        Self::with_clock(data_dir, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        data_dir: &Path,
        config: &VerificationConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GateError> {
        let gate = Self {
            path: data_dir.join(RECORD_FILE),
            ttl: Duration::minutes(config.code_ttl_minutes.max(1)),
            max_attempts: config.max_attempts.max(1),
            clock,
            attempts: Mutex::new(Attempts::default()),
        };

        if VerificationRecord::load(&gate.path)?.is_none() {
            VerificationRecord::default().save(&gate.path)?;
            tracing::info!(path = %gate.path.display(), "created verification record");
        }
        Ok(gate)
    }

    pub fn record_path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Attempts> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> Result<VerificationRecord, GateError> {
        Ok(VerificationRecord::load(&self.path)?.unwrap_or_default())
    }

    /// Issue a new code, replacing any outstanding one.
    pub fn generate_code(&self) -> Result<IssuedCode, GateError> {
        let mut attempts = self.lock();
        let mut record = self.read()?;
        if record.is_verified {
            return Err(GateError::AlreadyVerified);
        }

        let code = generate_code();
        let expires_at = self.clock.now() + self.ttl;
        record.code_hash = Some(hash_code(code.expose_secret()));
        record.expires_at = expires_at;
        record.save(&self.path)?;
        attempts.failures = 0;

        tracing::info!(expires_at = %expires_at.to_rfc3339(), "verification code generated");
        Ok(IssuedCode { code, expires_at })
    }

    /// Boolean form of [`Self::verify_code_detailed`].
    pub fn verify_code(&self, code: &str) -> Result<bool, GateError> {
        Ok(self.verify_code_detailed(code)?.passed())
    }

    pub fn verify_code_detailed(&self, code: &str) -> Result<VerifyOutcome, GateError> {
        let mut attempts = self.lock();
        let mut record = self.read()?;

        if record.is_verified {
            return Ok(VerifyOutcome::AlreadyVerified);
        }
        let Some(stored) = record.code_hash.as_deref() else {
            tracing::warn!("verification attempted with no code issued");
            return Ok(VerifyOutcome::NoCodeIssued);
        };

        let now = self.clock.now();
        if now > record.expires_at {
            tracing::warn!(expired_at = %record.expires_at.to_rfc3339(), "verification code expired");
            return Ok(VerifyOutcome::Expired);
        }
        if attempts.failures >= self.max_attempts {
            tracing::warn!(
                failures = attempts.failures,
                "verification throttled until a new code is issued"
            );
            return Ok(VerifyOutcome::Throttled);
        }

        let candidate = hash_code(code.trim());
        if !sealdb_crypto::constant_time_eq(candidate.as_bytes(), stored.as_bytes()) {
            attempts.failures += 1;
            tracing::warn!(failures = attempts.failures, "verification code mismatch");
            return Ok(VerifyOutcome::Mismatch);
        }

        record.is_verified = true;
        record.verified_at = Some(now);
        record.code_hash = None;
        record.save(&self.path)?;
        attempts.failures = 0;

        tracing::info!("installation verified");
        Ok(VerifyOutcome::Verified)
    }

    /// Whether the installation has been verified. Read errors count as no.
    pub fn is_verification_completed(&self) -> bool {
        let _attempts = self.lock();
        match self.read() {
            Ok(record) => record.is_verified,
            Err(e) => {
                tracing::warn!("reading verification record failed: {e}");
                false
            }
        }
    }

    pub fn status(&self) -> Result<VerificationStatus, GateError> {
        let _attempts = self.lock();
        let record = self.read()?;
        Ok(VerificationStatus {
            is_verified: record.is_verified,
            verified_at: record.verified_at,
        })
    }

    pub fn state(&self) -> Result<GateState, GateError> {
        let _attempts = self.lock();
        Ok(self.read()?.state())
    }

    /// Back to unverified: clears the code, expiry, flag and timestamp.
    pub fn reset(&self) -> Result<(), GateError> {
        let mut attempts = self.lock();
        VerificationRecord::default().save(&self.path)?;
        attempts.failures = 0;
        tracing::info!("verification reset");
        Ok(())
    }
}
