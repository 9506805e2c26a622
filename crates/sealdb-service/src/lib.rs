//! sealdb-service: the public operation surface of sealdb
//!
//! `SealService` wires key management, the verification gate and the
//! transform engine from one `SealConfig`. Boundary operations log their
//! failures and return plain results; only key retrieval errors propagate.

pub mod connect;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rusqlite::Connection;
use sealdb_core::{SealConfig, SealError, SealResult, TransformOutcome};
use sealdb_gate::{GateError, IssuedCode, VerificationGate, VerificationStatus};
use sealdb_secrets::{notify, KeyError, KeyManager, Notifier};
use sealdb_transform::{MaintenanceStatus, TransformEngine, TransformError, TransformReport};
use secrecy::SecretString;

pub use connect::{open_keyed, AccessError};

pub struct SealService {
    config: SealConfig,
    keys: KeyManager,
    gate: VerificationGate,
    engine: TransformEngine,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for SealService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealService")
            .field("data_dir", &self.keys.data_dir())
            .field("gate", &self.gate)
            .field("engine", &self.engine)
            .finish()
    }
}

impl SealService {
    /// Build every component from `config`. The data dir is created if needed.
    pub fn from_config(config: SealConfig) -> anyhow::Result<Self> {
        let keys = KeyManager::from_config(&config).context("initializing key manager")?;
        let gate = VerificationGate::open(&config.data_dir(), &config.verification)
            .context("opening verification record")?;
        let engine = TransformEngine::new(&config.transform, config.backup_dir());
        let notifier = notify::notifier_from_config(&config);

        tracing::debug!(data_dir = %config.data_dir().display(), "seal service ready");
        Ok(Self::new(config, keys, gate, engine, notifier))
    }

    pub fn new(
        config: SealConfig,
        keys: KeyManager,
        gate: VerificationGate,
        engine: TransformEngine,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            keys,
            gate,
            engine,
            notifier,
        }
    }

    pub fn config(&self) -> &SealConfig {
        &self.config
    }

    pub fn device_id(&self) -> String {
        self.keys.device_id()
    }

    // -- keys --

    /// Derive the database key. Failure here is fatal for the caller.
    pub fn get_encryption_key(
        &self,
        password: Option<&SecretString>,
    ) -> Result<SecretString, KeyError> {
        self.keys.get_encryption_key(password).inspect_err(|e| {
            tracing::error!("{e}");
        })
    }

    pub fn set_password(&self, new_password: &SecretString) -> bool {
        self.keys.set_password(new_password)
    }

    pub fn validate_password(&self, password: &SecretString) -> bool {
        self.keys.validate_password(password)
    }

    pub fn has_password(&self) -> bool {
        self.keys.has_password()
    }

    // -- verification --

    pub fn generate_verification_code(&self) -> SealResult<IssuedCode> {
        self.gate.generate_code().map_err(gate_error)
    }

    /// Issue a code and hand it to the notifier for the configured recipient.
    pub fn send_verification_code(&self) -> SealResult<()> {
        if self.gate.is_verification_completed() {
            return Err(SealError::Verification(
                "installation is already verified".into(),
            ));
        }
        let recipient = self.config.require_recipient()?;
        if !self.notifier.delivers() {
            tracing::warn!(
                recipient,
                "notifier does not deliver codes; set notify.mode = \"outbox\" to reach the recipient"
            );
        }
        let issued = self.generate_verification_code()?;

        self.notifier
            .send_verification_code(recipient, &issued.code)
            .map_err(|e| {
                tracing::error!(recipient, "sending verification code failed: {e:#}");
                SealError::Notify(format!("{e:#}"))
            })?;
        tracing::info!(
            recipient,
            expires_at = %issued.expires_at.to_rfc3339(),
            "verification code sent"
        );
        Ok(())
    }

    /// `true` when `code` passes or the installation is already verified.
    pub fn verify_code(&self, code: &str) -> bool {
        match self.gate.verify_code_detailed(code) {
            Ok(outcome) => {
                if !outcome.passed() {
                    tracing::info!(?outcome, "verification code rejected");
                }
                outcome.passed()
            }
            Err(e) => {
                tracing::error!("verifying code failed: {e}");
                false
            }
        }
    }

    pub fn is_verification_completed(&self) -> bool {
        self.gate.is_verification_completed()
    }

    /// Current status; an unreadable record reports as unverified.
    pub fn verification_status(&self) -> VerificationStatus {
        self.gate.status().unwrap_or_else(|e| {
            tracing::error!("reading verification status failed: {e}");
            VerificationStatus {
                is_verified: false,
                verified_at: None,
            }
        })
    }

    pub fn reset_verification(&self) -> bool {
        match self.gate.reset() {
            Ok(()) => {
                tracing::info!("verification reset");
                true
            }
            Err(e) => {
                tracing::error!("resetting verification failed: {e}");
                false
            }
        }
    }

    // -- database --

    pub fn encrypt_database(&self, src: &Path, dst: &Path, key: &SecretString) -> TransformOutcome {
        outcome(self.engine.encrypt(src, dst, key), "database encrypted")
    }

    pub fn decrypt_database(&self, src: &Path, dst: &Path, key: &SecretString) -> TransformOutcome {
        outcome(self.engine.decrypt(src, dst, key), "database decrypted")
    }

    /// Open the configured database with the key derived from `password`.
    pub fn open_database(
        &self,
        password: Option<&SecretString>,
    ) -> Result<Connection, AccessError> {
        let status = self.engine.status();
        if status.is_active() {
            return Err(AccessError::MaintenanceInProgress);
        }
        if !self.gate.is_verification_completed() {
            return Err(AccessError::NotVerified);
        }
        let key = self.get_encryption_key(password)?;
        open_keyed(&self.config.database_path(), &key, &self.gate, &status)
    }

    pub fn is_transform_in_progress(&self) -> bool {
        self.engine.status().is_active()
    }

    /// Handle for code that must stay off the database during a transform.
    pub fn maintenance_status(&self) -> MaintenanceStatus {
        self.engine.status()
    }
}

fn gate_error(e: GateError) -> SealError {
    match e {
        GateError::Io(io) => SealError::Io(io),
        other => SealError::Verification(other.to_string()),
    }
}

fn outcome(result: Result<TransformReport, TransformError>, done: &str) -> TransformOutcome {
    match result {
        Ok(report) => {
            let message = format!(
                "{done} successfully in {} ms",
                report.elapsed.as_millis()
            );
            TransformOutcome::success(message)
        }
        Err(e) => {
            tracing::error!("database transform failed: {e}");
            TransformOutcome::failure(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_outcome_messages() {
        let ok = outcome(
            Ok(TransformReport {
                direction: sealdb_core::TransformDirection::Encrypt,
                source: "seal.db".into(),
                elapsed: Duration::from_millis(12),
                relocated: Vec::new(),
            }),
            "database encrypted",
        );
        assert!(ok.ok);
        assert_eq!(ok.message, "database encrypted successfully in 12 ms");

        let failed = outcome(Err(TransformError::IncorrectKey), "database decrypted");
        assert!(!failed.ok);
        assert!(failed.message.contains("incorrect key"));
    }

    #[test]
    fn test_gate_error_mapping() {
        assert!(matches!(
            gate_error(GateError::AlreadyVerified),
            SealError::Verification(_)
        ));
        assert!(matches!(
            gate_error(GateError::Io(std::io::Error::other("disk"))),
            SealError::Io(_)
        ));
    }
}
