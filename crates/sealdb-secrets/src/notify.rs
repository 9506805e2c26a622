//! Outbound notifications: new-device alerts and verification codes.
//!
//! Delivery is someone else's job. `LogNotifier` only records that a message
//! would be sent; `OutboxNotifier` drops JSON messages into a pickup
//! directory for an external mail agent. Failures are logged by the caller
//! and never reach key retrieval.

use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sealdb_core::config::{NotifyMode, SealConfig};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::store::write_private;

/// One-time alert sent when an installation generates its base key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDeviceAlert {
    pub device_id: String,
    pub ip: String,
    /// Short digest of the derived key; the key itself never leaves the process
    pub key_reference: String,
    pub registered_at: DateTime<Utc>,
}

pub trait Notifier: Send + Sync {
    fn send_new_device_alert(&self, alert: &NewDeviceAlert) -> Result<()>;

    fn send_verification_code(&self, recipient: &str, code: &SecretString) -> Result<()>;

    /// Whether messages actually reach their recipient.
    fn delivers(&self) -> bool {
        true
    }
}

/// Logs message metadata without the secret content.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_new_device_alert(&self, alert: &NewDeviceAlert) -> Result<()> {
        tracing::info!(
            device_id = %alert.device_id,
            ip = %alert.ip,
            key_reference = %alert.key_reference,
            registered_at = %alert.registered_at.to_rfc3339(),
            "new device registered"
        );
        Ok(())
    }

    fn send_verification_code(&self, recipient: &str, _code: &SecretString) -> Result<()> {
        tracing::info!(recipient, "verification code issued (log mode, not delivered)");
        Ok(())
    }

    fn delivers(&self) -> bool {
        false
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboxMessage {
    NewDeviceAlert {
        id: String,
        to: Option<String>,
        created_at: DateTime<Utc>,
        alert: NewDeviceAlert,
    },
    VerificationCode {
        id: String,
        to: String,
        created_at: DateTime<Utc>,
        code: String,
    },
}

/// Writes one JSON file per message into a pickup directory.
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    dir: PathBuf,
    admin: Option<String>,
}

impl OutboxNotifier {
    /// `admin` receives new-device alerts; codes carry their own recipient.
    pub fn new(dir: impl Into<PathBuf>, admin: Option<String>) -> Self {
        Self {
            dir: dir.into(),
            admin,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn drop_message(&self, kind: &str, message: &OutboxMessage) -> Result<PathBuf> {
        let name = format!(
            "{}-{kind}-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
            uuid::Uuid::new_v4().simple()
        );
        let path = self.dir.join(name);
        let json = serde_json::to_vec_pretty(message).context("serializing outbox message")?;
        write_private(&path, &json)?;
        tracing::debug!(path = %path.display(), kind, "outbox message written");
        Ok(path)
    }
}

impl Notifier for OutboxNotifier {
    fn send_new_device_alert(&self, alert: &NewDeviceAlert) -> Result<()> {
        let message = OutboxMessage::NewDeviceAlert {
            id: uuid::Uuid::new_v4().to_string(),
            to: self.admin.clone(),
            created_at: Utc::now(),
            alert: alert.clone(),
        };
        self.drop_message("new-device", &message).map(|_| ())
    }

    fn send_verification_code(&self, recipient: &str, code: &SecretString) -> Result<()> {
        let message = OutboxMessage::VerificationCode {
            id: uuid::Uuid::new_v4().to_string(),
            to: recipient.to_string(),
            created_at: Utc::now(),
            code: code.expose_secret().to_string(),
        };
        self.drop_message("verification-code", &message)
            .map(|_| ())
    }
}

/// Build the notifier named by `[notify] mode`.
pub fn notifier_from_config(config: &SealConfig) -> Arc<dyn Notifier> {
    match config.notify.mode {
        NotifyMode::Log => Arc::new(LogNotifier),
        NotifyMode::Outbox => Arc::new(OutboxNotifier::new(
            config.outbox_dir(),
            config.verification.recipient.clone(),
        )),
    }
}

/// First 16 hex characters of SHA-256 over the key text.
pub fn key_reference(key: &SecretString) -> String {
    let digest = Sha256::digest(key.expose_secret().as_bytes());
    hex::encode(&digest[..8])
}

/// Local address used for outbound traffic, resolved without sending packets.
pub fn local_ip() -> String {
    let routed = UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .ok()
        .filter(|ip| !ip.is_unspecified());

    if let Some(ip) = routed {
        return ip.to_string();
    }
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Send the alert off the caller's path. Runs on the tokio blocking pool when
/// a runtime is active, otherwise on a detached thread.
pub fn dispatch_new_device_alert(notifier: Arc<dyn Notifier>, alert: NewDeviceAlert) {
    let send = move || {
        if let Err(e) = notifier.send_new_device_alert(&alert) {
            tracing::warn!(device_id = %alert.device_id, "new device alert failed: {e:#}");
        }
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(send);
        }
        Err(_) => {
            if let Err(e) = std::thread::Builder::new()
                .name("sealdb-alert".into())
                .spawn(send)
            {
                tracing::warn!("could not start alert thread: {e}");
            }
        }
    }
}
