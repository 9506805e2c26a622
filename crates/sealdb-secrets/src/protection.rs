//! Protector selection and the keychain-backed protector.

use std::sync::Arc;

use anyhow::{Context, Result};
use sealdb_core::config::ProtectorKind;
use sealdb_crypto::{AeadProtector, KeyProtector, LegacyProtector, KEY_SIZE};
use zeroize::Zeroizing;

use crate::identity;
use crate::keychain;

/// XChaCha20-Poly1305 sealing with a wrapping key held in the platform keychain.
#[derive(Debug)]
pub struct KeychainProtector {
    inner: AeadProtector,
}

impl KeychainProtector {
    /// Load the wrapping key from the keychain, creating it on first use.
    pub fn open(service: &str) -> Result<Self> {
        let key = match keychain::get_bytes(service, keychain::keys::WRAPPING_KEY)? {
            Some(bytes) => {
                if bytes.len() != KEY_SIZE {
                    anyhow::bail!(
                        "keychain wrapping key has wrong size: {} bytes (expected {KEY_SIZE})",
                        bytes.len()
                    );
                }
                let mut key = Zeroizing::new([0u8; KEY_SIZE]);
                key.copy_from_slice(&bytes);
                key
            }
            None => {
                let key = sealdb_crypto::generate_base_key();
                keychain::store_bytes(service, keychain::keys::WRAPPING_KEY, &key[..])
                    .context("storing new wrapping key")?;
                tracing::info!(service, "created keychain wrapping key");
                key
            }
        };
        Ok(Self::with_key(*key))
    }

    /// Build from an explicit wrapping key (headless hosts, tests).
    pub fn with_key(key: [u8; KEY_SIZE]) -> Self {
        Self {
            inner: AeadProtector::new(key),
        }
    }
}

impl KeyProtector for KeychainProtector {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.inner.protect(plaintext)
    }

    fn unprotect(&self, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.inner.unprotect(blob)
    }

    fn name(&self) -> &'static str {
        "keychain"
    }

    fn is_hardened(&self) -> bool {
        true
    }
}

/// The legacy protector for the current host and user.
pub fn legacy_for_host() -> LegacyProtector {
    tracing::warn!(
        "using legacy key protection (AES-CBC, name-derived key); not suitable for production"
    );
    LegacyProtector::from_identity(&identity::machine_name(), &identity::user_name())
}

/// Pick the at-rest protector once at startup.
///
/// `auto` resolves to DPAPI on Windows, else the platform keychain when it
/// persists entries, else the legacy protector.
pub fn select_protector(kind: ProtectorKind, service: &str) -> Result<Arc<dyn KeyProtector>> {
    let protector: Arc<dyn KeyProtector> = match kind {
        ProtectorKind::Auto => auto_protector(service),
        ProtectorKind::Keychain => {
            if !keychain::is_available(service) {
                anyhow::bail!("platform keychain is not available on this host");
            }
            Arc::new(KeychainProtector::open(service)?)
        }
        ProtectorKind::Dpapi => dpapi_protector()?,
        ProtectorKind::Legacy => Arc::new(legacy_for_host()),
    };
    tracing::info!(
        protector = protector.name(),
        hardened = protector.is_hardened(),
        "key protector selected"
    );
    Ok(protector)
}

#[cfg(windows)]
fn auto_protector(_service: &str) -> Arc<dyn KeyProtector> {
    Arc::new(sealdb_crypto::DpapiProtector)
}

#[cfg(not(windows))]
fn auto_protector(service: &str) -> Arc<dyn KeyProtector> {
    if keychain::is_available(service) {
        match KeychainProtector::open(service) {
            Ok(p) => return Arc::new(p),
            Err(e) => tracing::warn!("keychain protector unavailable: {e:#}"),
        }
    }
    Arc::new(legacy_for_host())
}

#[cfg(windows)]
fn dpapi_protector() -> Result<Arc<dyn KeyProtector>> {
    Ok(Arc::new(sealdb_crypto::DpapiProtector))
}

#[cfg(not(windows))]
fn dpapi_protector() -> Result<Arc<dyn KeyProtector>> {
    anyhow::bail!("DPAPI protection is only available on Windows")
}
