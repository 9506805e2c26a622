//! sealdb-crypto: key derivation and at-rest protection for sealdb
//!
//! Key pipeline:
//! ```text
//! Base key (256-bit random, stored protected)
//!   └── Hardware-bound key = HMAC-SHA256(base key, machine fingerprint)
//!         ├── Cipher key = base64(PBKDF2-SHA256(password, fixed salt ‖ bound key, 50k))
//!         │     or base64(bound key) when no password is set
//!         └── Verification bytes = PBKDF2-SHA512(password, bound key, 25k, 64 bytes)
//! ```
//!
//! The verification bytes use a different hash, salt and iteration count than
//! the cipher key, so a stored verification hash cannot be turned back into a
//! cipher key.

pub mod binding;
pub mod kdf;
pub mod protector;

pub use binding::bind_to_fingerprint;
pub use kdf::{constant_time_eq, derive_key, derive_verification_bytes};
pub use protector::{AeadProtector, KeyProtector, LegacyProtector};

#[cfg(windows)]
pub use protector::DpapiProtector;

/// Size of the base key and every derived key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Generate 32 random bytes from the OS CSPRNG.
pub fn generate_base_key() -> zeroize::Zeroizing<[u8; KEY_SIZE]> {
    use rand::RngCore;

    let mut bytes = zeroize::Zeroizing::new([0u8; KEY_SIZE]);
    rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_keys_differ() {
        let k1 = generate_base_key();
        let k2 = generate_base_key();
        assert_ne!(*k1, *k2, "random keys must differ");
    }
}
