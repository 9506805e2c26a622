//! At-rest protection of key material
//!
//! A `KeyProtector` turns secret bytes into an opaque blob that only the same
//! machine/user context can turn back. Exactly one protector is selected at
//! startup; callers never branch on the platform themselves.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Opaque, reversible protection for key material.
///
/// Contract: `unprotect(protect(x)) == x` within the same machine/user context.
pub trait KeyProtector: Send + Sync {
    fn protect(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>>;

    fn unprotect(&self, blob: &[u8]) -> anyhow::Result<Zeroizing<Vec<u8>>>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Whether the backend is bound to an OS-managed secret.
    fn is_hardened(&self) -> bool;
}

/// XChaCha20-Poly1305 sealing under an explicit 256-bit wrapping key.
///
/// Blob layout: `[24-byte nonce][ciphertext + 16-byte tag]`
pub struct AeadProtector {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl AeadProtector {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }
}

impl std::fmt::Debug for AeadProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadProtector")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl KeyProtector for AeadProtector {
    fn protect(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.key[..]));

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| anyhow::anyhow!("sealing key material failed: {e}"))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn unprotect(&self, blob: &[u8]) -> anyhow::Result<Zeroizing<Vec<u8>>> {
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            anyhow::bail!(
                "protected blob too short: {} bytes (expected at least {})",
                blob.len(),
                NONCE_SIZE + TAG_SIZE
            );
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
        let nonce = XNonce::from_slice(nonce_bytes);
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.key[..]));

        let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|_| {
            anyhow::anyhow!("unsealing key material failed: wrong wrapping key or corrupted data")
        })?;
        Ok(Zeroizing::new(plaintext))
    }

    fn name(&self) -> &'static str {
        "aead"
    }

    fn is_hardened(&self) -> bool {
        false
    }
}

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256-CBC with a zero IV and a key derived from machine and user names.
///
/// Anyone who knows both names can recompute the key, so this is obfuscation
/// rather than protection. Kept only for hosts with no OS secret store.
pub struct LegacyProtector {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl LegacyProtector {
    pub fn from_identity(machine_name: &str, user_name: &str) -> Self {
        let digest = Sha256::digest(format!("{machine_name}:{user_name}").as_bytes());
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(&digest);
        Self { key }
    }
}

impl std::fmt::Debug for LegacyProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyProtector")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl KeyProtector for LegacyProtector {
    fn protect(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        use cbc::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};

        let iv = [0u8; 16];
        let enc = Aes256CbcEnc::new_from_slices(&self.key[..], &iv)
            .map_err(|e| anyhow::anyhow!("legacy cipher init failed: {e}"))?;
        Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
    }

    fn unprotect(&self, blob: &[u8]) -> anyhow::Result<Zeroizing<Vec<u8>>> {
        use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};

        let iv = [0u8; 16];
        let dec = Aes256CbcDec::new_from_slices(&self.key[..], &iv)
            .map_err(|e| anyhow::anyhow!("legacy cipher init failed: {e}"))?;
        let plaintext = dec
            .decrypt_padded_vec_mut::<Pkcs7>(blob)
            .map_err(|_| anyhow::anyhow!("legacy unprotect failed: bad padding or wrong host"))?;
        Ok(Zeroizing::new(plaintext))
    }

    fn name(&self) -> &'static str {
        "legacy"
    }

    fn is_hardened(&self) -> bool {
        false
    }
}

/// Windows DPAPI, current-user scope.
#[cfg(windows)]
#[derive(Debug, Default)]
pub struct DpapiProtector;

#[cfg(windows)]
mod dpapi {
    use std::ptr;
    use windows_sys::Win32::Foundation::LocalFree;
    use windows_sys::Win32::Security::Cryptography::{
        CryptProtectData, CryptUnprotectData, CRYPTPROTECT_UI_FORBIDDEN, CRYPT_INTEGER_BLOB,
    };

    fn blob_of(data: &[u8]) -> CRYPT_INTEGER_BLOB {
        CRYPT_INTEGER_BLOB {
            cbData: data.len() as u32,
            pbData: data.as_ptr() as *mut u8,
        }
    }

    /// Copy the DPAPI-owned output buffer and release it.
    unsafe fn take(out: CRYPT_INTEGER_BLOB) -> Vec<u8> {
        let bytes = std::slice::from_raw_parts(out.pbData, out.cbData as usize).to_vec();
        LocalFree(out.pbData as _);
        bytes
    }

    pub(super) fn protect(data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let input = blob_of(data);
        let mut output = CRYPT_INTEGER_BLOB {
            cbData: 0,
            pbData: ptr::null_mut(),
        };

        let ok = unsafe {
            CryptProtectData(
                &input,
                ptr::null(),
                ptr::null(),
                ptr::null(),
                ptr::null(),
                CRYPTPROTECT_UI_FORBIDDEN,
                &mut output,
            )
        };
        if ok == 0 {
            anyhow::bail!("DPAPI protect failed: {}", std::io::Error::last_os_error());
        }
        Ok(unsafe { take(output) })
    }

    pub(super) fn unprotect(data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let input = blob_of(data);
        let mut output = CRYPT_INTEGER_BLOB {
            cbData: 0,
            pbData: ptr::null_mut(),
        };

        let ok = unsafe {
            CryptUnprotectData(
                &input,
                ptr::null_mut(),
                ptr::null(),
                ptr::null(),
                ptr::null(),
                CRYPTPROTECT_UI_FORBIDDEN,
                &mut output,
            )
        };
        if ok == 0 {
            anyhow::bail!(
                "DPAPI unprotect failed: {}",
                std::io::Error::last_os_error()
            );
        }
        Ok(unsafe { take(output) })
    }
}

#[cfg(windows)]
impl KeyProtector for DpapiProtector {
    fn protect(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        dpapi::protect(plaintext)
    }

    fn unprotect(&self, blob: &[u8]) -> anyhow::Result<Zeroizing<Vec<u8>>> {
        dpapi::unprotect(blob).map(Zeroizing::new)
    }

    fn name(&self) -> &'static str {
        "dpapi"
    }

    fn is_hardened(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aead_roundtrip() {
        let p = AeadProtector::new([42u8; KEY_SIZE]);
        let secret = [7u8; KEY_SIZE];

        let blob = p.protect(&secret).unwrap();
        assert_eq!(blob.len(), NONCE_SIZE + KEY_SIZE + TAG_SIZE);
        assert_eq!(p.unprotect(&blob).unwrap().as_slice(), &secret);
    }

    #[test]
    fn test_aead_nonce_is_random() {
        let p = AeadProtector::new([42u8; KEY_SIZE]);
        let a = p.protect(b"same input").unwrap();
        let b = p.protect(b"same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_aead_wrong_key_fails() {
        let blob = AeadProtector::new([1u8; KEY_SIZE])
            .protect(b"secret")
            .unwrap();
        assert!(AeadProtector::new([2u8; KEY_SIZE]).unprotect(&blob).is_err());
    }

    #[test]
    fn test_aead_tampered_blob_fails() {
        let p = AeadProtector::new([1u8; KEY_SIZE]);
        let mut blob = p.protect(b"secret").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(p.unprotect(&blob).is_err());
        assert!(p.unprotect(&blob[..NONCE_SIZE]).is_err());
    }

    #[test]
    fn test_legacy_roundtrip() {
        let p = LegacyProtector::from_identity("build-01", "svc");
        let secret = [9u8; KEY_SIZE];

        let blob = p.protect(&secret).unwrap();
        // 32 bytes of input plus one full PKCS#7 padding block
        assert_eq!(blob.len(), 48);
        assert_eq!(p.unprotect(&blob).unwrap().as_slice(), &secret);
    }

    #[test]
    fn test_legacy_deterministic() {
        let p = LegacyProtector::from_identity("build-01", "svc");
        assert_eq!(p.protect(b"abc").unwrap(), p.protect(b"abc").unwrap());
    }

    #[test]
    fn test_legacy_other_host_cannot_read() {
        let blob = LegacyProtector::from_identity("build-01", "svc")
            .protect(&[9u8; KEY_SIZE])
            .unwrap();
        let other = LegacyProtector::from_identity("build-02", "svc");
        match other.unprotect(&blob) {
            Err(_) => {}
            Ok(bytes) => assert_ne!(bytes.as_slice(), &[9u8; KEY_SIZE]),
        }
    }

    #[test]
    fn test_debug_redacts() {
        let dbg = format!("{:?}", AeadProtector::new([0xAB; KEY_SIZE]));
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("171"));
    }

    #[test]
    fn test_trait_object_names() {
        let protectors: Vec<Box<dyn KeyProtector>> = vec![
            Box::new(AeadProtector::new([0u8; KEY_SIZE])),
            Box::new(LegacyProtector::from_identity("m", "u")),
        ];
        let names: Vec<_> = protectors.iter().map(|p| p.name()).collect();
        assert_eq!(names, ["aead", "legacy"]);
        assert!(protectors.iter().all(|p| !p.is_hardened()));
    }

    #[cfg(windows)]
    #[test]
    fn test_dpapi_roundtrip() {
        let p = DpapiProtector;
        let blob = p.protect(b"dpapi secret").unwrap();
        assert_eq!(p.unprotect(&blob).unwrap().as_slice(), b"dpapi secret");
    }
}
