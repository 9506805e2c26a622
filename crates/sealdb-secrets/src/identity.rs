//! Machine fingerprinting
//!
//! The fingerprint is recomputed on every key request and never persisted.
//! Cloned VMs may share a machine id, so it is not guaranteed unique.

/// A machine fingerprint plus whether it came from the weak fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub value: String,
    /// True when only hostname and user name were available
    pub degraded: bool,
}

/// Source of the machine fingerprint used for hardware binding.
pub trait MachineIdentity: Send + Sync {
    fn fingerprint(&self) -> Fingerprint;
}

/// Fingerprint from the running host: platform machine id plus CPU info.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIdentity;

impl MachineIdentity for SystemIdentity {
    fn fingerprint(&self) -> Fingerprint {
        let mut parts = Vec::new();

        match machine_uid::get() {
            Ok(id) if !id.trim().is_empty() => parts.push(id.trim().to_string()),
            Ok(_) => tracing::debug!("platform machine id is empty"),
            Err(e) => tracing::debug!("platform machine id unavailable: {e}"),
        }
        if let Some(cpu) = processor_id() {
            parts.push(cpu);
        }

        if !parts.is_empty() {
            return Fingerprint {
                value: parts.join("-"),
                degraded: false,
            };
        }

        tracing::warn!("no stable hardware identifiers found, using hostname and user name");
        let fallback = format!("{}-{}", machine_name(), user_name());
        Fingerprint {
            value: fallback,
            degraded: true,
        }
    }
}

/// A fixed fingerprint, for tests or for pinning a cloned installation.
#[derive(Debug, Clone)]
pub struct StaticIdentity(String);

impl StaticIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl MachineIdentity for StaticIdentity {
    fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            value: self.0.clone(),
            degraded: false,
        }
    }
}

/// Short device identifier that can leave the machine without exposing the
/// raw fingerprint.
pub fn device_id(fingerprint: &str) -> String {
    blake3::hash(fingerprint.as_bytes()).to_hex().as_str()[..16].to_string()
}

/// Host name, or `unknown-host` when it cannot be read.
pub fn machine_name() -> String {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Login name from the environment, or `unknown-user`.
pub fn user_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| "unknown-user".to_string())
}

#[cfg(target_os = "linux")]
fn processor_id() -> Option<String> {
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    parse_cpuinfo(&cpuinfo)
}

#[cfg(not(target_os = "linux"))]
fn processor_id() -> Option<String> {
    None
}

/// Prefer the board serial (ARM) and fall back to the first model name.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_cpuinfo(cpuinfo: &str) -> Option<String> {
    let field = |name: &str| {
        cpuinfo.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            let value = value.trim();
            (key.trim() == name && !value.is_empty()).then(|| value.to_string())
        })
    };
    field("Serial").or_else(|| field("model name"))
}
