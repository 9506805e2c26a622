//! Password strengthening: PBKDF2 cipher key and verification bytes

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use pbkdf2::pbkdf2_hmac;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Sha256, Sha512};
use zeroize::Zeroizing;

use crate::KEY_SIZE;

/// PBKDF2-HMAC-SHA256 rounds for the cipher key
pub const CIPHER_KEY_ITERATIONS: u32 = 50_000;

/// PBKDF2-HMAC-SHA512 rounds for the verification bytes
pub const VERIFICATION_ITERATIONS: u32 = CIPHER_KEY_ITERATIONS / 2;

/// Length of the verification bytes (512-bit)
pub const VERIFICATION_LEN: usize = 64;

/// Fixed salt prefix for cipher-key derivation. The per-machine entropy
/// appended to it is what makes the salt unique.
const FIXED_SALT: [u8; 16] = [
    0x3F, 0x68, 0x92, 0xA4, 0xD1, 0xB5, 0xC3, 0xE7, 0xF9, 0x45, 0x21, 0x36, 0x7C, 0x8D, 0x9A, 0xB2,
];

/// Derive the database cipher key from a password and the hardware-bound key.
///
/// Salt is `FIXED_SALT ‖ entropy`. Output is 32 bytes, base64-encoded, which
/// is the form handed to SQLCipher.
pub fn derive_key(password: &SecretString, entropy: &[u8]) -> anyhow::Result<SecretString> {
    let password = password.expose_secret();
    if password.is_empty() {
        anyhow::bail!("password must not be empty");
    }

    let mut salt = Zeroizing::new(Vec::with_capacity(FIXED_SALT.len() + entropy.len()));
    salt.extend_from_slice(&FIXED_SALT);
    salt.extend_from_slice(entropy);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        &salt,
        CIPHER_KEY_ITERATIONS,
        &mut key[..],
    );

    Ok(SecretString::from(BASE64.encode(&key[..])))
}

/// Derive bytes that validate a password without reconstructing the cipher key.
pub fn derive_verification_bytes(
    password: &SecretString,
    entropy: &[u8],
) -> anyhow::Result<Zeroizing<[u8; VERIFICATION_LEN]>> {
    let password = password.expose_secret();
    if password.is_empty() {
        anyhow::bail!("password must not be empty");
    }

    let mut out = Zeroizing::new([0u8; VERIFICATION_LEN]);
    pbkdf2_hmac::<Sha512>(
        password.as_bytes(),
        entropy,
        VERIFICATION_ITERATIONS,
        &mut out[..],
    );
    Ok(out)
}

/// Compare two buffers in time that depends only on the longer length.
///
/// A length mismatch is folded into the accumulator instead of returning
/// early, so it fails closed after the same full pass.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());
    let mut diff = (a.len() ^ b.len()) as u64;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= u64::from(x ^ y);
    }
    std::hint::black_box(diff) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode(key: &SecretString) -> Vec<u8> {
        BASE64.decode(key.expose_secret()).unwrap()
    }

    #[test]
    fn test_derive_key_deterministic() {
        let password = SecretString::from("correct horse");
        let entropy = [7u8; KEY_SIZE];

        let k1 = derive_key(&password, &entropy).unwrap();
        let k2 = derive_key(&password, &entropy).unwrap();

        assert_eq!(k1.expose_secret(), k2.expose_secret(), "KDF must be deterministic");
        assert_eq!(decode(&k1).len(), KEY_SIZE);
    }

    #[test]
    fn test_derive_key_different_passwords() {
        let entropy = [7u8; KEY_SIZE];
        let k1 = derive_key(&SecretString::from("password-a"), &entropy).unwrap();
        let k2 = derive_key(&SecretString::from("password-b"), &entropy).unwrap();

        assert_ne!(
            k1.expose_secret(),
            k2.expose_secret(),
            "different passwords must produce different keys"
        );
    }

    #[test]
    fn test_derive_key_different_entropy() {
        let password = SecretString::from("same-password");
        let k1 = derive_key(&password, &[1u8; KEY_SIZE]).unwrap();
        let k2 = derive_key(&password, &[2u8; KEY_SIZE]).unwrap();

        assert_ne!(k1.expose_secret(), k2.expose_secret());
    }

    #[test]
    fn test_empty_password_rejected() {
        let empty = SecretString::from("");
        assert!(derive_key(&empty, &[0u8; KEY_SIZE]).is_err());
        assert!(derive_verification_bytes(&empty, &[0u8; KEY_SIZE]).is_err());
    }

    #[test]
    fn test_verification_bytes_unrelated_to_cipher_key() {
        let password = SecretString::from("Tr0ub4dor&3");
        let entropy = [9u8; KEY_SIZE];

        let cipher = decode(&derive_key(&password, &entropy).unwrap());
        let verify = derive_verification_bytes(&password, &entropy).unwrap();

        assert_eq!(verify.len(), VERIFICATION_LEN);
        assert_ne!(&verify[..KEY_SIZE], cipher.as_slice());
        assert_ne!(&verify[KEY_SIZE..], cipher.as_slice());
    }

    #[test]
    fn test_constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(constant_time_eq(b"", b""));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        // Zero padding of the shorter side must not make a prefix match.
        assert!(!constant_time_eq(b"abc\0", b"abc"));
    }

    proptest! {
        #[test]
        fn constant_time_eq_matches_slice_eq(
            a in proptest::collection::vec(any::<u8>(), 0..=96),
            b in proptest::collection::vec(any::<u8>(), 0..=96),
        ) {
            prop_assert_eq!(constant_time_eq(&a, &b), a == b);
        }

        #[test]
        fn constant_time_eq_reflexive(a in proptest::collection::vec(any::<u8>(), 0..=96)) {
            prop_assert!(constant_time_eq(&a, &a.clone()));
        }
    }
}
