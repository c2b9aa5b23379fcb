use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

use super::Ticket;

type HmacSha256 = Hmac<Sha256>;

const FORMAT_VERSION: u8 = 1;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const MIN_SECRET_LEN: usize = 32;

/// What a protected ticket may be used for. A ticket protected for one purpose
/// never unprotects under another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    AccessToken,
    Cookie,
    RefreshTicket,
}

impl Purpose {
    fn label(self) -> &'static str {
        match self {
            Purpose::AccessToken => "ticket:access_token:v1",
            Purpose::Cookie => "ticket:cookie:v1",
            Purpose::RefreshTicket => "ticket:refresh:v1",
        }
    }
}

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("Ticket secret must be at least 32 bytes")]
    WeakSecret,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Ticket serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Ticket encryption failed")]
    Encryption,
}

/// Symmetric ticket protection: AES-256-GCM with a per-purpose key derived
/// from the process secret. Output is `base64url(version || nonce || ciphertext)`.
#[derive(Clone)]
pub struct TicketProtector {
    access_token: Aes256Gcm,
    cookie: Aes256Gcm,
    refresh: Aes256Gcm,
}

impl TicketProtector {
    pub fn new(secret: &[u8]) -> Result<Self, TicketError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(TicketError::WeakSecret);
        }

        Ok(Self {
            access_token: derive_cipher(secret, Purpose::AccessToken)?,
            cookie: derive_cipher(secret, Purpose::Cookie)?,
            refresh: derive_cipher(secret, Purpose::RefreshTicket)?,
        })
    }

    fn cipher(&self, purpose: Purpose) -> &Aes256Gcm {
        match purpose {
            Purpose::AccessToken => &self.access_token,
            Purpose::Cookie => &self.cookie,
            Purpose::RefreshTicket => &self.refresh,
        }
    }

    pub fn protect(&self, ticket: &Ticket, purpose: Purpose) -> Result<String, TicketError> {
        let plaintext = serde_json::to_vec(ticket)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher(purpose)
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &plaintext,
                    aad: purpose.label().as_bytes(),
                },
            )
            .map_err(|_| TicketError::Encryption)?;

        let mut out = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Reverse of [`protect`](Self::protect). Any malformed, truncated,
    /// tampered or wrong-purpose input yields `None`.
    pub fn unprotect(&self, protected: &str, purpose: Purpose) -> Option<Ticket> {
        let raw = URL_SAFE_NO_PAD.decode(protected.trim()).ok()?;
        if raw.len() < 1 + NONCE_SIZE + TAG_SIZE || raw[0] != FORMAT_VERSION {
            return None;
        }

        let (nonce, ciphertext) = raw[1..].split_at(NONCE_SIZE);
        let plaintext = self
            .cipher(purpose)
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: purpose.label().as_bytes(),
                },
            )
            .ok()?;

        match serde_json::from_slice(&plaintext) {
            Ok(ticket) => Some(ticket),
            Err(e) => {
                tracing::warn!(error = %e, "Authenticated ticket payload failed to deserialize");
                None
            }
        }
    }
}

fn derive_cipher(secret: &[u8], purpose: Purpose) -> Result<Aes256Gcm, TicketError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .map_err(|e| TicketError::KeyDerivation(e.to_string()))?;
    mac.update(purpose.label().as_bytes());
    let key = mac.finalize().into_bytes();

    Aes256Gcm::new_from_slice(&key).map_err(|e| TicketError::KeyDerivation(e.to_string()))
}
