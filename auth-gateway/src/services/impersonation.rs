//! Signed nonces binding an impersonation request to the user who made it.
//!
//! Format: `{expires_unix}.{acting_user_id}.{hex(hmac)}` where the MAC covers
//! `purpose|target|acting|expires`. Altering the target id, the acting id or
//! the expiry invalidates the MAC.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoncePurpose {
    Impersonate,
    Revoke,
}

impl NoncePurpose {
    fn label(self) -> &'static str {
        match self {
            NoncePurpose::Impersonate => "impersonate",
            NoncePurpose::Revoke => "revoke",
        }
    }
}

#[derive(Clone)]
pub struct ImpersonationSigner {
    keyed: HmacSha256,
    ttl: Duration,
}

impl ImpersonationSigner {
    pub fn new(secret: &str, ttl_seconds: i64) -> Result<Self, anyhow::Error> {
        let keyed = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid impersonation key: {}", e))?;
        let ttl = Duration::try_seconds(ttl_seconds)
            .filter(|ttl| *ttl > Duration::zero())
            .ok_or_else(|| anyhow::anyhow!("Invalid impersonation nonce lifetime: {}s", ttl_seconds))?;
        Ok(Self { keyed, ttl })
    }

    fn mac(&self, purpose: NoncePurpose, target: i64, acting: i64, expires: i64) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(format!("{}|{}|{}|{}", purpose.label(), target, acting, expires).as_bytes());
        mac
    }

    pub fn mint(&self, purpose: NoncePurpose, target: i64, acting: i64) -> Option<String> {
        self.mint_at(purpose, target, acting, Utc::now())
    }

    /// `None` when `now + ttl` falls outside the representable range.
    pub fn mint_at(
        &self,
        purpose: NoncePurpose,
        target: i64,
        acting: i64,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let expires = now.checked_add_signed(self.ttl)?.timestamp();
        let tag = self
            .mac(purpose, target, acting, expires)
            .finalize()
            .into_bytes();
        Some(format!("{}.{}.{}", expires, acting, hex::encode(tag)))
    }

    /// Returns the acting user id when the nonce is authentic, unexpired and
    /// was minted for `purpose` and `target`.
    pub fn verify(&self, nonce: &str, purpose: NoncePurpose, target: i64) -> Option<i64> {
        self.verify_at(nonce, purpose, target, Utc::now())
    }

    pub fn verify_at(
        &self,
        nonce: &str,
        purpose: NoncePurpose,
        target: i64,
        now: DateTime<Utc>,
    ) -> Option<i64> {
        let mut parts = nonce.trim().splitn(3, '.');
        let expires: i64 = parts.next()?.parse().ok()?;
        let acting: i64 = parts.next()?.parse().ok()?;
        let tag = hex::decode(parts.next()?).ok()?;

        if now.timestamp() >= expires {
            return None;
        }

        self.mac(purpose, target, acting, expires)
            .verify_slice(&tag)
            .ok()
            .map(|_| acting)
    }
}
