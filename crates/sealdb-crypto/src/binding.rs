//! Hardware binding: mix the base key with a machine fingerprint

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::KEY_SIZE;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 keyed by the base key over the UTF-8 fingerprint.
///
/// Deterministic for a given (base key, fingerprint) pair. Moving the key
/// material to another machine yields a different bound key.
pub fn bind_to_fingerprint(
    base_key: &[u8],
    fingerprint: &str,
) -> anyhow::Result<Zeroizing<[u8; KEY_SIZE]>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(base_key)
        .map_err(|e| anyhow::anyhow!("invalid HMAC key: {e}"))?;
    mac.update(fingerprint.as_bytes());

    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}
