use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SealError, SealResult};

/// Top-level configuration (loaded from sealdb.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealConfig {
    pub paths: PathsConfig,
    pub keys: KeysConfig,
    pub verification: VerificationConfig,
    pub transform: TransformConfig,
    pub notify: NotifyConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Installation state directory: key file, verification record, markers
    pub data_dir: PathBuf,
    /// Live SQLite database (default: <data_dir>/seal.db)
    pub database: Option<PathBuf>,
    /// Scratch file for transforms (default: <database dir>/temp_transform.db)
    pub transform_temp: Option<PathBuf>,
    /// Where transform remnants are relocated (default: <data_dir>/backups)
    pub backup_dir: Option<PathBuf>,
    /// Pickup directory for the outbox notifier (default: <data_dir>/outbox)
    pub outbox_dir: Option<PathBuf>,
}

/// At-rest protection backend for key material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectorKind {
    /// DPAPI on Windows, platform keychain elsewhere, legacy as last resort
    Auto,
    Keychain,
    Dpapi,
    /// AES-CBC with a name-derived key. Not suitable for production.
    Legacy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub protector: ProtectorKind,
    /// Keep the primary base-key replica in the platform keychain
    pub use_keychain: bool,
    /// Keychain service name for all entries
    pub keychain_service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Lifetime of an issued code in minutes (default: 30)
    pub code_ttl_minutes: i64,
    /// Wrong guesses tolerated per issued code (default: 5)
    pub max_attempts: u32,
    /// Administrator mailbox that receives codes
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Attempts to take an exclusive lock on the source (default: 10)
    pub lock_retries: u32,
    /// Fixed wait between lock attempts in milliseconds (default: 300)
    pub lock_backoff_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyMode {
    /// Log that a message would be sent, without its secret content
    Log,
    /// Write messages into the outbox pickup directory
    Outbox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub mode: NotifyMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.local/share/sealdb"),
            database: None,
            transform_temp: None,
            backup_dir: None,
            outbox_dir: None,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            protector: ProtectorKind::Auto,
            use_keychain: true,
            keychain_service: "sealdb".into(),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            code_ttl_minutes: 30,
            max_attempts: 5,
            recipient: None,
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            lock_retries: 10,
            lock_backoff_ms: 300,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            mode: NotifyMode::Log,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl SealConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist. Callers report the missing file once logging is up.
    pub fn load(path: &Path) -> SealResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| SealError::Config(format!("reading config {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| SealError::Config(format!("parsing config {}: {e}", path.display())))
    }

    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.paths.data_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        match &self.paths.database {
            Some(p) => expand_tilde(p),
            None => self.data_dir().join("seal.db"),
        }
    }

    pub fn transform_temp_path(&self) -> PathBuf {
        match &self.paths.transform_temp {
            Some(p) => expand_tilde(p),
            None => {
                let db = self.database_path();
                db.parent()
                    .map(|dir| dir.join("temp_transform.db"))
                    .unwrap_or_else(|| PathBuf::from("temp_transform.db"))
            }
        }
    }

    pub fn backup_dir(&self) -> PathBuf {
        match &self.paths.backup_dir {
            Some(p) => expand_tilde(p),
            None => self.data_dir().join("backups"),
        }
    }

    pub fn outbox_dir(&self) -> PathBuf {
        match &self.paths.outbox_dir {
            Some(p) => expand_tilde(p),
            None => self.data_dir().join("outbox"),
        }
    }

    /// The administrator mailbox, or a config error when none is set.
    pub fn require_recipient(&self) -> SealResult<&str> {
        match self.verification.recipient.as_deref() {
            Some(r) if !r.trim().is_empty() => Ok(r),
            _ => Err(SealError::Config(
                "verification.recipient is not configured".into(),
            )),
        }
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(rest) = s.strip_prefix("~/") {
            return home_dir().join(rest);
        }
    }
    path.to_path_buf()
}
