//! Manage signed session and MFA-challenge tokens.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};

use crate::config::Token as TokenConfig;
use crate::error::Result;

/// Pieces of information asserted on a session token.
///
/// Session and MFA-challenge tokens are structurally identical; they
/// differ only in lifetime and in the cookie that transports them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Identifies the expiration time on or after which the token must
    /// not be accepted for processing.
    pub exp: u64,
    /// Identifies the time at which the token was issued.
    pub iat: u64,
    /// Identifies the instance that issued the token.
    pub iss: String,
    /// User ID.
    pub sub: String,
}

/// Mint and check signed tokens with a process-wide secret.
#[derive(Clone)]
pub struct TokenManager {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    session_ttl_secs: u64,
    mfa_challenge_ttl_secs: u64,
}

impl TokenManager {
    /// Create a new [`TokenManager`] instance.
    pub fn new(issuer: &str, secret: &str, config: &TokenConfig) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_owned(),
            session_ttl_secs: config.session_ttl_secs,
            mfa_challenge_ttl_secs: config.mfa_challenge_ttl_secs,
        }
    }

    /// Lifetime of a full session token, in seconds.
    pub fn session_ttl_secs(&self) -> u64 {
        self.session_ttl_secs
    }

    /// Lifetime of an MFA-challenge token, in seconds.
    pub fn mfa_challenge_ttl_secs(&self) -> u64 {
        self.mfa_challenge_ttl_secs
    }

    /// Mint a full session token.
    pub fn create_session(&self, user_id: &str) -> Result<String> {
        self.create(user_id, self.session_ttl_secs)
    }

    /// Mint a short-lived MFA-challenge token. It proves a correct
    /// password only; a separate completion flow must consume it.
    pub fn create_mfa_challenge(&self, user_id: &str) -> Result<String> {
        self.create(user_id, self.mfa_challenge_ttl_secs)
    }

    fn create(&self, user_id: &str, ttl_secs: u64) -> Result<String> {
        let now = unix_now();
        let header = Header::new(self.algorithm);
        let claims = Claims {
            exp: now + ttl_secs,
            iat: now,
            iss: self.issuer.clone(),
            sub: user_id.to_owned(),
        };

        Ok(encode(&header, &claims, &self.encoding_key)?)
    }

    /// Decode and check a token. Any signature mismatch, tampering or
    /// expiry fails closed.
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[&self.issuer]);

        Ok(decode::<Claims>(token, &self.decoding_key, &validation)?.claims)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(secret: &str) -> TokenManager {
        TokenManager::new("https://auth.test/", secret, &TokenConfig::default())
    }

    #[test]
    fn test_create_and_decode() {
        let manager = manager("test-secret");
        let token = manager.create_session("f1d9e819").unwrap();
        let claims = manager.decode(&token).unwrap();

        assert_eq!(claims.sub, "f1d9e819");
        assert_eq!(claims.iss, "https://auth.test/");
        assert_eq!(claims.exp - claims.iat, 24 * 60 * 60);
    }

    #[test]
    fn test_mfa_challenge_is_short_lived() {
        let manager = manager("test-secret");
        let token = manager.create_mfa_challenge("f1d9e819").unwrap();
        let claims = manager.decode(&token).unwrap();

        assert_eq!(claims.exp - claims.iat, 60 * 60);
    }

    #[test]
    fn test_wrong_secret_fails_closed() {
        let token = manager("secret-a").create_session("f1d9e819").unwrap();
        assert!(manager("secret-b").decode(&token).is_err());
    }

    #[test]
    fn test_tampered_token_fails_closed() {
        let manager = manager("test-secret");
        let mut token = manager.create_session("f1d9e819").unwrap();
        // Flip a character inside the payload segment.
        let payload_start = token.find('.').unwrap() + 1;
        let replacement = if token.as_bytes()[payload_start] == b'A' {
            "B"
        } else {
            "A"
        };
        token.replace_range(payload_start..payload_start + 1, replacement);

        assert!(manager.decode(&token).is_err());
    }

    #[test]
    fn test_expired_token_fails_closed() {
        let now = unix_now();
        let claims = Claims {
            exp: now - 120,
            iat: now - 240,
            iss: "https://auth.test/".to_owned(),
            sub: "f1d9e819".to_owned(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert!(manager("test-secret").decode(&token).is_err());
    }
}
