//! Redundant persistence of the protected base key.
//!
//! The base key is generated once per installation and kept in two replicas:
//! the platform keychain (primary) and `key_config.dat` in the data dir.
//! Only the protected form ever reaches either slot.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use sealdb_crypto::KeyProtector;

use crate::keychain;

/// File replica of the protected base key
pub const KEY_FILE: &str = "key_config.dat";

/// Written once when the base key is first generated
pub const MARKER_FILE: &str = "first_registration.marker";

/// One persistence location for the protected base key.
pub trait SecretSlot: Send + Sync {
    fn read(&self) -> Result<Option<Vec<u8>>>;

    fn write(&self, blob: &[u8]) -> Result<()>;

    fn describe(&self) -> String;
}

/// Base64 blob in the platform keychain under `<service>/base-key`.
#[derive(Debug, Clone)]
pub struct KeychainSlot {
    service: String,
}

impl KeychainSlot {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl SecretSlot for KeychainSlot {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        Ok(keychain::get_bytes(&self.service, keychain::keys::BASE_KEY)?
            .map(|bytes| bytes.to_vec()))
    }

    fn write(&self, blob: &[u8]) -> Result<()> {
        keychain::store_bytes(&self.service, keychain::keys::BASE_KEY, blob)
    }

    fn describe(&self) -> String {
        format!("keychain:{}/{}", self.service, keychain::keys::BASE_KEY)
    }
}

/// Raw blob in a file, owner-only on Unix.
#[derive(Debug, Clone)]
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecretSlot for FileSlot {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }

    fn write(&self, blob: &[u8]) -> Result<()> {
        write_private(&self.path, blob)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// Result of a base-key lookup.
pub struct BaseKeyLookup {
    /// Protected form, as stored
    pub protected: Vec<u8>,
    /// True only on the very first generation for this installation
    pub created: bool,
}

impl std::fmt::Debug for BaseKeyLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseKeyLookup")
            .field("protected", &format_args!("[{} bytes]", self.protected.len()))
            .field("created", &self.created)
            .finish()
    }
}

/// Loads or creates the protected base key across its replicas.
pub struct KeyMaterialStore {
    slots: Vec<Box<dyn SecretSlot>>,
    protector: Arc<dyn KeyProtector>,
    marker_path: PathBuf,
    /// Held across lookup, generation and persistence
    lock: Mutex<()>,
}

impl KeyMaterialStore {
    /// Slots are consulted in order; the first is the primary replica.
    pub fn new(
        slots: Vec<Box<dyn SecretSlot>>,
        protector: Arc<dyn KeyProtector>,
        data_dir: &Path,
    ) -> Self {
        Self {
            slots,
            protector,
            marker_path: data_dir.join(MARKER_FILE),
            lock: Mutex::new(()),
        }
    }

    /// Keychain primary (when enabled) plus the `key_config.dat` replica.
    pub fn with_defaults(
        data_dir: &Path,
        keychain_service: Option<&str>,
        protector: Arc<dyn KeyProtector>,
    ) -> Self {
        let mut slots: Vec<Box<dyn SecretSlot>> = Vec::new();
        if let Some(service) = keychain_service {
            slots.push(Box::new(KeychainSlot::new(service)));
        }
        slots.push(Box::new(FileSlot::new(data_dir.join(KEY_FILE))));
        Self::new(slots, protector, data_dir)
    }

    pub fn protector(&self) -> &dyn KeyProtector {
        self.protector.as_ref()
    }

    /// Timestamp recorded when the base key was first generated.
    pub fn registered_at(&self) -> Option<String> {
        std::fs::read_to_string(&self.marker_path)
            .ok()
            .map(|s| s.trim().to_string())
    }

    /// Return the protected base key, generating and persisting it if absent.
    ///
    /// Concurrent callers on the same store all receive the same key.
    pub fn get_or_create_base_key(&self) -> Result<BaseKeyLookup> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut found: Option<(usize, Vec<u8>)> = None;
        let mut missing = Vec::new();

        for (idx, slot) in self.slots.iter().enumerate() {
            match slot.read() {
                Ok(Some(blob)) => {
                    if found.is_none() {
                        found = Some((idx, blob));
                    }
                }
                Ok(None) => missing.push(idx),
                Err(e) => tracing::warn!(slot = %slot.describe(), "base key read failed: {e:#}"),
            }
        }

        if let Some((source, blob)) = found {
            for idx in missing {
                let slot = &self.slots[idx];
                match slot.write(&blob) {
                    Ok(()) => tracing::info!(
                        from = %self.slots[source].describe(),
                        to = %slot.describe(),
                        "restored missing base key replica"
                    ),
                    Err(e) => {
                        tracing::warn!(slot = %slot.describe(), "base key replica restore failed: {e:#}")
                    }
                }
            }
            return Ok(BaseKeyLookup {
                protected: blob,
                created: false,
            });
        }

        self.create_base_key()
    }

    fn create_base_key(&self) -> Result<BaseKeyLookup> {
        let base = sealdb_crypto::generate_base_key();
        let protected = self
            .protector
            .protect(&base[..])
            .with_context(|| format!("protecting new base key with {}", self.protector.name()))?;

        let mut written = 0usize;
        for slot in &self.slots {
            match slot.write(&protected) {
                Ok(()) => written += 1,
                Err(e) => tracing::warn!(slot = %slot.describe(), "base key write failed: {e:#}"),
            }
        }
        if written == 0 {
            anyhow::bail!("could not persist the base key to any slot");
        }

        let first = self.claim_registration();

        tracing::info!(
            slots = written,
            protector = self.protector.name(),
            "generated new base key"
        );
        Ok(BaseKeyLookup {
            protected,
            created: first,
        })
    }

    /// Create the registration marker. True only for the caller that created it.
    fn claim_registration(&self) -> bool {
        if let Some(parent) = self.marker_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("creating dir {} failed: {e}", parent.display());
            }
        }

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = match options.open(&self.marker_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return false,
            Err(e) => {
                tracing::warn!(
                    path = %self.marker_path.display(),
                    "creating registration marker failed: {e}"
                );
                return false;
            }
        };

        let stamp = chrono::Utc::now().to_rfc3339();
        if let Err(e) = file.write_all(stamp.as_bytes()).and_then(|()| file.sync_all()) {
            tracing::warn!("writing registration marker failed: {e}");
        }
        true
    }
}

/// Write `bytes` to `path` atomically (temp + rename), owner-only on Unix.
pub(crate) fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating dir: {}", parent.display()))?;
    }

    let tmp_path = path.with_extension("tmp");
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(&tmp_path)
        .with_context(|| format!("creating {}", tmp_path.display()))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .with_context(|| format!("writing {}", tmp_path.display()))?;
    drop(file);

    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {} → {}", tmp_path.display(), path.display()))
}
