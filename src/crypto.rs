//! Cryptographic logics: password hashing and one-time-code digests.

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use constant_time_eq::constant_time_eq_32;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::config::Argon2 as ArgonConfig;

const DIGEST_LENGTH: usize = 32;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
    #[error("hex is not valid")]
    Hex(#[from] hex::FromHexError),
}

/// Cryptographic manager.
pub struct Crypto {
    pub pwd: PasswordManager,
    pub code: CodeHasher,
}

impl Crypto {
    /// Create a new [`Crypto`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        Ok(Self {
            pwd: PasswordManager::new(config)?,
            code: CodeHasher,
        })
    }
}

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
pub struct PasswordManager {
    params: Params,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2 {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash a secret using Argon2id with a random salt.
    pub fn hash(&self, secret: impl AsRef<[u8]>) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(secret.as_ref(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Verify a candidate secret against a PHC string.
    ///
    /// A mismatch is `Ok(false)`; only a malformed PHC string is an
    /// error.
    pub fn verify(
        &self,
        phc_hash: &str,
        candidate: impl AsRef<[u8]>,
    ) -> Result<bool> {
        let parsed = PasswordHash::new(phc_hash)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        match self.argon2().verify_password(candidate.as_ref(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(_) => Ok(false),
        }
    }
}

/// One-way digest for one-time verification codes. The raw code is
/// delivered out-of-band and never stored; only this digest is.
pub struct CodeHasher;

impl CodeHasher {
    /// Digest a raw code into a hex-encoded SHA-256 hash.
    pub fn digest(&self, code: impl AsRef<[u8]>) -> String {
        hex::encode(Self::digest_bytes(code))
    }

    fn digest_bytes(code: impl AsRef<[u8]>) -> [u8; DIGEST_LENGTH] {
        let mut hasher = Sha256::new();
        hasher.update(code.as_ref());
        hasher.finalize().into()
    }

    /// Compare a presented raw code against a stored hex digest in
    /// constant time. A stored value of the wrong length still burns a
    /// full comparison before failing.
    pub fn matches(&self, stored_hash_hex: &str, presented: &str) -> bool {
        let rebuilt = Self::digest_bytes(presented);

        let stored: [u8; DIGEST_LENGTH] = match hex::decode(stored_hash_hex)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
        {
            Some(stored) => stored,
            None => {
                let _ = constant_time_eq_32(&rebuilt, &rebuilt);
                return false;
            },
        };

        constant_time_eq_32(&rebuilt, &stored)
    }
}
