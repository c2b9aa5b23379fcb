use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::fmt;

/// Plaintext password. `Debug` is redacted so it never reaches a log line.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// PHC-formatted argon2 hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Hash a password with Argon2id and a fresh random salt.
pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = Argon2::default()
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(hash))
}

/// Check a password against a stored hash.
///
/// A malformed stored hash is treated as a mismatch and logged; callers only
/// ever learn "matches" or "does not match".
pub fn verify_password(password: &Password, stored: &PasswordHashString) -> bool {
    let parsed = match PasswordHash::new(stored.as_str()) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::error!(error = %e, "Stored password hash is not valid PHC");
            return false;
        }
    };

    Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed)
        .is_ok()
}
