use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Base64 SHA-256 of a secret. Used for client secrets, refresh token ids and
/// access token echoes; none of those are ever stored in plaintext.
pub fn hash_secret(secret: &str) -> String {
    STANDARD.encode(Sha256::digest(secret.as_bytes()))
}

/// Hash `presented` and compare it against `expected_hash` in constant time.
pub fn verify_secret(presented: &str, expected_hash: &str) -> bool {
    constant_time_eq(hash_secret(presented).as_bytes(), expected_hash.as_bytes())
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
