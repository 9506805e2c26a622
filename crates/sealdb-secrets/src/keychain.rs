//! Platform keychain access for key material.
//!
//! Uses the `keyring` crate:
//! - macOS: Keychain Services
//! - Windows: Credential Manager
//!
//! Hosts without a native backend get keyring's in-memory mock, which does
//! not persist between entries. `is_available` detects that with a round trip.

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use zeroize::{Zeroize, Zeroizing};

/// Store a secret string under `service/key_name`.
pub fn store_secret(service: &str, key_name: &str, secret: &SecretString) -> Result<()> {
    let entry = keyring::Entry::new(service, key_name)
        .map_err(|e| anyhow::anyhow!("keychain entry creation: {e}"))?;
    entry
        .set_password(secret.expose_secret())
        .map_err(|e| anyhow::anyhow!("keychain store for '{key_name}': {e}"))?;
    tracing::debug!(service, key = key_name, "stored secret in platform keychain");
    Ok(())
}

/// Retrieve a secret string, `None` when the entry does not exist.
pub fn get_secret(service: &str, key_name: &str) -> Result<Option<SecretString>> {
    let entry = keyring::Entry::new(service, key_name)
        .map_err(|e| anyhow::anyhow!("keychain entry creation: {e}"))?;
    match entry.get_password() {
        Ok(mut password) => {
            let secret = SecretString::from(password.clone());
            password.zeroize();
            Ok(Some(secret))
        }
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(anyhow::anyhow!("keychain get for '{key_name}': {e}")),
    }
}

/// Delete a secret. Deleting a missing entry is not an error.
pub fn delete_secret(service: &str, key_name: &str) -> Result<()> {
    let entry = keyring::Entry::new(service, key_name)
        .map_err(|e| anyhow::anyhow!("keychain entry creation: {e}"))?;
    match entry.delete_credential() {
        Ok(()) => {
            tracing::debug!(service, key = key_name, "deleted secret from platform keychain");
            Ok(())
        }
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("keychain delete for '{key_name}': {e}")),
    }
}

/// Store binary material as base64.
pub fn store_bytes(service: &str, key_name: &str, bytes: &[u8]) -> Result<()> {
    store_secret(service, key_name, &SecretString::from(BASE64.encode(bytes)))
}

/// Retrieve binary material stored with [`store_bytes`].
pub fn get_bytes(service: &str, key_name: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
    match get_secret(service, key_name)? {
        Some(encoded) => {
            let bytes = BASE64
                .decode(encoded.expose_secret())
                .map_err(|e| anyhow::anyhow!("keychain entry '{key_name}' is not base64: {e}"))?;
            Ok(Some(Zeroizing::new(bytes)))
        }
        None => Ok(None),
    }
}

/// Check whether the platform keychain persists entries.
///
/// Writes a probe through one entry, reads it back through a fresh one,
/// then deletes it.
pub fn is_available(service: &str) -> bool {
    let probe = SecretString::from(uuid::Uuid::new_v4().to_string());
    if store_secret(service, keys::PROBE, &probe).is_err() {
        return false;
    }
    let persisted = matches!(
        get_secret(service, keys::PROBE),
        Ok(Some(read)) if read.expose_secret() == probe.expose_secret()
    );
    if let Err(e) = delete_secret(service, keys::PROBE) {
        tracing::debug!("keychain probe cleanup failed: {e}");
    }
    persisted
}

/// Well-known keychain key names
pub mod keys {
    /// Protected base key replica (base64)
    pub const BASE_KEY: &str = "base-key";
    /// Wrapping key of the keychain protector (base64)
    pub const WRAPPING_KEY: &str = "wrapping-key";
    /// Availability probe, removed right after use
    pub const PROBE: &str = "__sealdb_probe__";
}
