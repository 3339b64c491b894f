use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use sqlx::{Pool, Postgres};

use crate::crypto::Crypto;
use crate::error::{Result, ServerError};
use crate::verification::{TokenPurpose, TokenRepository};

/// Raw codes are 256 bits of OS randomness, hex-encoded for transport.
const CODE_LENGTH_BYTES: usize = 32;

const TOKEN_NOT_FOUND: &str = "Verification token not found.";
const TOKEN_EXPIRED: &str = "Verification token has expired.";
const CODE_MISMATCH: &str = "Invalid identifier or credentials.";

/// Issue and redeem one-time verification codes.
#[derive(Clone)]
pub struct TokenService {
    pub repo: TokenRepository,
    crypto: Arc<Crypto>,
    ttl_secs: u64,
}

impl TokenService {
    /// Create a new [`TokenService`].
    pub fn new(
        pool: Pool<Postgres>,
        crypto: Arc<Crypto>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            repo: TokenRepository::new(pool),
            crypto,
            ttl_secs,
        }
    }

    /// Generate a fresh one-time code for email+purpose, persist its
    /// hash with an expiry, and return the raw code for out-of-band
    /// delivery. The raw code is never persisted or logged.
    pub async fn issue(
        &self,
        email: &str,
        purpose: TokenPurpose,
    ) -> Result<String> {
        let mut bytes = [0u8; CODE_LENGTH_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let raw_code = hex::encode(bytes);

        let code_hash = self.crypto.code.digest(&raw_code);
        let expires_at = Utc::now() + Duration::seconds(self.ttl_secs as i64);

        self.repo
            .insert(email, &code_hash, purpose, expires_at)
            .await?;

        tracing::debug!(email, %purpose, "verification token issued");
        Ok(raw_code)
    }

    /// Redeem a presented code against the authoritative (most recent
    /// unconsumed, unexpired) token for email+purpose. An expired
    /// newer token never shadows a still-valid older one.
    ///
    /// Missing token, expired token and code mismatch are distinct
    /// outcomes; only a winning constant-time match mutates state, and
    /// the conditional consume guarantees at most one success per
    /// token.
    pub async fn redeem(
        &self,
        email: &str,
        purpose: TokenPurpose,
        presented_code: &str,
        request_ip: Option<&str>,
    ) -> Result<()> {
        let Some(token) = self.repo.find_latest_active(email, purpose).await?
        else {
            // Nothing redeemable: expired tokens answer differently
            // from absent ones.
            let expired = self
                .repo
                .find_latest_unconsumed(email, purpose)
                .await?
                .is_some();
            return Err(if expired {
                ServerError::Expired(TOKEN_EXPIRED.to_owned())
            } else {
                ServerError::Auth(TOKEN_NOT_FOUND.to_owned())
            });
        };

        if !self.crypto.code.matches(&token.code_hash, presented_code) {
            return Err(ServerError::Auth(CODE_MISMATCH.to_owned()));
        }

        if !self.repo.consume(token.id, request_ip).await? {
            // Lost a race against a concurrent redemption.
            return Err(ServerError::Auth(TOKEN_NOT_FOUND.to_owned()));
        }

        tracing::debug!(email, %purpose, "verification token consumed");
        Ok(())
    }
}
