//! Key orchestration: base key → hardware binding → optional password.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sealdb_core::SealConfig;
use sealdb_crypto::{
    bind_to_fingerprint, constant_time_eq, derive_key, derive_verification_bytes, KEY_SIZE,
};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::identity::{self, MachineIdentity, SystemIdentity};
use crate::notify::{self, NewDeviceAlert, Notifier};
use crate::protection::select_protector;
use crate::store::{write_private, KeyMaterialStore};

/// Protected password verification hash
pub const VERIFY_FILE: &str = "verify.dat";

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// Any step of derivation failed. There is no fallback key.
    #[error("key retrieval failed: {0}")]
    Retrieval(String),
}

/// Derives the database key on demand. Nothing derived is cached.
pub struct KeyManager {
    store: KeyMaterialStore,
    identity: Arc<dyn MachineIdentity>,
    notifier: Arc<dyn Notifier>,
    data_dir: PathBuf,
}

impl KeyManager {
    pub fn new(
        store: KeyMaterialStore,
        identity: Arc<dyn MachineIdentity>,
        notifier: Arc<dyn Notifier>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            identity,
            notifier,
            data_dir: data_dir.into(),
        }
    }

    /// Wire the host protector, keychain/file slots, system identity and the
    /// configured notifier.
    pub fn from_config(config: &SealConfig) -> Result<Self> {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data dir: {}", data_dir.display()))?;

        let protector = select_protector(config.keys.protector, &config.keys.keychain_service)?;
        let keychain_service = config
            .keys
            .use_keychain
            .then_some(config.keys.keychain_service.as_str());
        let store = KeyMaterialStore::with_defaults(&data_dir, keychain_service, protector);

        Ok(Self::new(
            store,
            Arc::new(SystemIdentity),
            notify::notifier_from_config(config),
            data_dir,
        ))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Device identifier for this machine, safe to show or send.
    pub fn device_id(&self) -> String {
        identity::device_id(&self.identity.fingerprint().value)
    }

    /// Derive the database key.
    ///
    /// With a password: `base64(PBKDF2-SHA256(password, salt ‖ bound key))`.
    /// Without: `base64(bound key)`. An empty password counts as none.
    pub fn get_encryption_key(
        &self,
        password: Option<&SecretString>,
    ) -> std::result::Result<SecretString, KeyError> {
        let password = password.filter(|p| !p.expose_secret().is_empty());

        let (bound, created) = self
            .hardware_bound_key()
            .map_err(|e| KeyError::Retrieval(format!("{e:#}")))?;

        let key = match password {
            Some(pw) => derive_key(pw, &bound[..])
                .map_err(|e| KeyError::Retrieval(format!("password derivation: {e:#}")))?,
            None => SecretString::from(BASE64.encode(&bound[..])),
        };

        if created {
            self.announce_new_device(&key);
        }
        Ok(key)
    }

    /// Store a verification hash for `new_password`. Blank passwords are
    /// rejected; failures are logged and reported as `false`.
    pub fn set_password(&self, new_password: &SecretString) -> bool {
        if new_password.expose_secret().trim().is_empty() {
            tracing::warn!("refusing to set a blank password");
            return false;
        }
        match self.store_verification_hash(new_password) {
            Ok(()) => {
                tracing::info!("password verification hash updated");
                true
            }
            Err(e) => {
                tracing::error!("setting password failed: {e:#}");
                false
            }
        }
    }

    /// Check `password` against the stored verification hash.
    pub fn validate_password(&self, password: &SecretString) -> bool {
        if password.expose_secret().is_empty() {
            return false;
        }
        match self.check_verification_hash(password) {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!("password validation failed: {e:#}");
                false
            }
        }
    }

    pub fn has_password(&self) -> bool {
        self.verify_path().exists()
    }

    fn verify_path(&self) -> PathBuf {
        self.data_dir.join(VERIFY_FILE)
    }

    fn store_verification_hash(&self, password: &SecretString) -> Result<()> {
        let (bound, created) = self.hardware_bound_key()?;
        if created {
            self.announce_new_device(&SecretString::from(BASE64.encode(&bound[..])));
        }
        let hash = derive_verification_bytes(password, &bound[..])?;
        let protected = self
            .store
            .protector()
            .protect(&hash[..])
            .context("protecting verification hash")?;
        write_private(&self.verify_path(), &protected)
    }

    fn check_verification_hash(&self, password: &SecretString) -> Result<bool> {
        let path = self.verify_path();
        let protected = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no password has been set");
                return Ok(false);
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let stored = self
            .store
            .protector()
            .unprotect(&protected)
            .context("unprotecting verification hash")?;

        let (bound, _) = self.hardware_bound_key()?;
        let candidate = derive_verification_bytes(password, &bound[..])?;
        Ok(constant_time_eq(&candidate[..], &stored))
    }

    /// Unprotect the base key and bind it to this machine. Also reports
    /// whether the base key was generated by this call.
    fn hardware_bound_key(&self) -> Result<(Zeroizing<[u8; KEY_SIZE]>, bool)> {
        let lookup = self
            .store
            .get_or_create_base_key()
            .context("loading base key")?;
        let base = self
            .store
            .protector()
            .unprotect(&lookup.protected)
            .with_context(|| format!("unprotecting base key ({})", self.store.protector().name()))?;
        if base.len() != KEY_SIZE {
            anyhow::bail!(
                "base key has wrong size: {} bytes (expected {KEY_SIZE})",
                base.len()
            );
        }

        let fingerprint = self.identity.fingerprint();
        if fingerprint.value.is_empty() {
            tracing::warn!("machine fingerprint is empty, key is not bound to this host");
            let mut unbound = Zeroizing::new([0u8; KEY_SIZE]);
            unbound.copy_from_slice(&base);
            return Ok((unbound, lookup.created));
        }
        if fingerprint.degraded {
            tracing::debug!("binding key to degraded fingerprint");
        }

        let bound = bind_to_fingerprint(&base, &fingerprint.value)?;
        Ok((bound, lookup.created))
    }

    fn announce_new_device(&self, key: &SecretString) {
        let alert = NewDeviceAlert {
            device_id: self.device_id(),
            ip: notify::local_ip(),
            key_reference: notify::key_reference(key),
            registered_at: chrono::Utc::now(),
        };
        tracing::info!(device_id = %alert.device_id, "first key registration on this device");
        notify::dispatch_new_device_alert(self.notifier.clone(), alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;
    use crate::notify::LogNotifier;
    use sealdb_crypto::LegacyProtector;

    fn manager(dir: &Path, fingerprint: &str) -> KeyManager {
        let protector = Arc::new(LegacyProtector::from_identity("test-host", "test-user"));
        KeyManager::new(
            KeyMaterialStore::with_defaults(dir, None, protector),
            Arc::new(StaticIdentity::new(fingerprint)),
            Arc::new(LogNotifier),
            dir,
        )
    }

    #[test]
    fn test_key_without_password_is_bound_key() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), "CPU123-VOL456");

        let k1 = m.get_encryption_key(None).unwrap();
        let k2 = m.get_encryption_key(None).unwrap();
        assert_eq!(k1.expose_secret(), k2.expose_secret());
        assert_eq!(BASE64.decode(k1.expose_secret()).unwrap().len(), KEY_SIZE);
    }

    #[test]
    fn test_empty_password_counts_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), "CPU123-VOL456");

        let none = m.get_encryption_key(None).unwrap();
        let empty = m.get_encryption_key(Some(&SecretString::from(""))).unwrap();
        assert_eq!(none.expose_secret(), empty.expose_secret());
    }

    #[test]
    fn test_password_changes_key() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), "CPU123-VOL456");

        let plain = m.get_encryption_key(None).unwrap();
        let a = m.get_encryption_key(Some(&SecretString::from("alpha"))).unwrap();
        let b = m.get_encryption_key(Some(&SecretString::from("bravo"))).unwrap();
        assert_ne!(plain.expose_secret(), a.expose_secret());
        assert_ne!(a.expose_secret(), b.expose_secret());
    }

    #[test]
    fn test_empty_fingerprint_uses_base_key() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), "");
        assert!(m.get_encryption_key(None).is_ok());
    }

    #[test]
    fn test_set_and_validate_password() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), "CPU123-VOL456");

        assert!(!m.has_password());
        assert!(!m.validate_password(&SecretString::from("Tr0ub4dor&3")));

        assert!(m.set_password(&SecretString::from("Tr0ub4dor&3")));
        assert!(m.has_password());
        assert!(m.validate_password(&SecretString::from("Tr0ub4dor&3")));
        assert!(!m.validate_password(&SecretString::from("tr0ub4dor&3")));
        assert!(!m.validate_password(&SecretString::from("")));
    }

    #[test]
    fn test_blank_password_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), "CPU123-VOL456");
        assert!(!m.set_password(&SecretString::from("   ")));
        assert!(!m.has_password());
    }

    #[test]
    fn test_corrupt_key_file_surfaces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(crate::store::KEY_FILE), b"not a protected blob").unwrap();

        let m = manager(dir.path(), "CPU123-VOL456");
        assert!(matches!(
            m.get_encryption_key(None),
            Err(KeyError::Retrieval(_))
        ));
    }
}
