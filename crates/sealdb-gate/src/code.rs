//! Code generation and hashing.

use rand::RngCore;
use secrecy::SecretString;
use sha2::{Digest, Sha256};

/// Number of digits in a verification code
pub const CODE_LEN: usize = 6;

/// Six decimal digits from the OS CSPRNG. Each digit is `|n % 10|` of a
/// random 32-bit signed integer.
pub fn generate_code() -> SecretString {
    let mut rng = rand::rngs::OsRng;
    let code: String = (0..CODE_LEN)
        .map(|_| {
            let n = rng.next_u32() as i32;
            char::from(b'0' + (n % 10).unsigned_abs() as u8)
        })
        .collect();
    SecretString::from(code)
}

/// Uppercase hex SHA-256 of the code text. Only this form is persisted.
pub fn hash_code(code: &str) -> String {
    hex::encode_upper(Sha256::digest(code.as_bytes()))
}
