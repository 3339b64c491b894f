use std::sync::Arc;
use std::sync::LazyLock;

use regex_lite::Regex;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::crypto::{Crypto, PasswordManager};
use crate::error::Result;
use crate::user::{NewUser, User, UserRepository};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$")
        .expect("email pattern must compile")
});

/// Plaintext credential fields touched by a write.
///
/// Hashing happens here, deliberately, as a visible pipeline step of
/// the write path: a field left as `None` is untouched, so re-saving a
/// user without changing a credential never re-hashes it.
#[derive(Debug, Default)]
pub struct CredentialChanges {
    pub password: Option<String>,
    pub secret_pin: Option<String>,
}

impl CredentialChanges {
    /// Hash changed, non-empty plaintext fields into their stored form.
    pub fn apply(
        self,
        pwd: &PasswordManager,
        password_hash: &mut String,
        secret_pin_hash: &mut Option<String>,
    ) -> Result<()> {
        if let Some(plain) =
            self.password.filter(|plain| !plain.trim().is_empty())
        {
            *password_hash = pwd.hash(plain)?;
        }

        if let Some(plain) =
            self.secret_pin.filter(|plain| !plain.trim().is_empty())
        {
            *secret_pin_hash = Some(pwd.hash(plain)?);
        }

        Ok(())
    }
}

/// Registration input, before credential hashing.
#[derive(Debug)]
pub struct RegistrationDraft {
    pub profile_picture: Option<String>,
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

const DEFAULT_PROFILE_PICTURE: &str = "default.png";

/// User manager.
#[derive(Clone)]
pub struct UserService {
    pub repo: UserRepository,
    crypto: Arc<Crypto>,
}

impl UserService {
    /// Create a new [`UserService`].
    pub fn new(pool: Pool<Postgres>, crypto: Arc<Crypto>) -> Self {
        Self {
            repo: UserRepository::new(pool),
            crypto,
        }
    }

    /// Create a user from a registration draft.
    ///
    /// Runs the credential pipeline, then inserts. New accounts start
    /// `active` with an unverified email.
    pub async fn create(&self, draft: RegistrationDraft) -> Result<User> {
        let mut password_hash = String::default();
        let mut secret_pin_hash = None;

        CredentialChanges {
            password: Some(draft.password),
            secret_pin: None,
        }
        .apply(&self.crypto.pwd, &mut password_hash, &mut secret_pin_hash)?;

        self.repo
            .insert(&NewUser {
                profile_picture: draft
                    .profile_picture
                    .unwrap_or_else(|| DEFAULT_PROFILE_PICTURE.to_owned()),
                name: draft.name,
                username: draft.username,
                email: draft.email,
                password_hash,
                secret_pin_hash,
                is_multi_factor_enabled: false,
            })
            .await
    }

    /// Resolve a login identifier to a user: an email-shaped value is
    /// looked up by email, a UUID by id, anything else matches nobody.
    ///
    /// Emails are stored lowercased, so the identifier is lowercased
    /// too; a user typing the same address with different casing must
    /// still match.
    pub async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<User>> {
        if EMAIL.is_match(identifier) {
            return self.repo.find_by_email(&identifier.to_lowercase()).await;
        }

        match Uuid::parse_str(identifier) {
            Ok(id) => self.repo.find_by_id(id).await,
            Err(_) => Ok(None),
        }
    }

    pub async fn is_username_taken(&self, username: &str) -> Result<bool> {
        Ok(self.repo.find_by_username(username).await?.is_some())
    }

    pub async fn is_email_taken(&self, email: &str) -> Result<bool> {
        Ok(self.repo.find_by_email(email).await?.is_some())
    }

    /// Check a candidate password against the stored hash.
    pub fn verify_password(
        &self,
        user: &User,
        candidate: &str,
    ) -> Result<bool> {
        Ok(self.crypto.pwd.verify(&user.password, candidate)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password_manager() -> PasswordManager {
        PasswordManager::new(None).unwrap()
    }

    #[test]
    fn test_pipeline_hashes_new_password() {
        let pwd = password_manager();
        let mut password_hash = String::default();
        let mut secret_pin_hash = None;

        CredentialChanges {
            password: Some("Secret123!".into()),
            secret_pin: Some("4821".into()),
        }
        .apply(&pwd, &mut password_hash, &mut secret_pin_hash)
        .unwrap();

        assert!(pwd.verify(&password_hash, "Secret123!").unwrap());
        assert!(
            pwd.verify(secret_pin_hash.as_deref().unwrap(), "4821").unwrap()
        );
    }

    #[test]
    fn test_pipeline_skips_unchanged_fields() {
        let pwd = password_manager();
        let mut password_hash = pwd.hash("Secret123!").unwrap();
        let before = password_hash.clone();
        let mut secret_pin_hash = None;

        CredentialChanges::default()
            .apply(&pwd, &mut password_hash, &mut secret_pin_hash)
            .unwrap();

        // Re-saving without touching the plaintext must not re-hash.
        assert_eq!(password_hash, before);
        assert_eq!(secret_pin_hash, None);
    }

    #[test]
    fn test_pipeline_ignores_blank_plaintext() {
        let pwd = password_manager();
        let mut password_hash = pwd.hash("Secret123!").unwrap();
        let before = password_hash.clone();
        let mut secret_pin_hash = None;

        CredentialChanges {
            password: Some("   ".into()),
            secret_pin: Some(String::default()),
        }
        .apply(&pwd, &mut password_hash, &mut secret_pin_hash)
        .unwrap();

        assert_eq!(password_hash, before);
        assert_eq!(secret_pin_hash, None);
    }

    #[test]
    fn test_identifier_shapes() {
        assert!(EMAIL.is_match("jane@example.com"));
        assert!(!EMAIL.is_match("jane example.com"));
        assert!(!EMAIL.is_match("janeexample.com"));
        assert!(Uuid::parse_str("f1d9e819-4c0b-4c95-9c3c-7b2f6c2f8a11").is_ok());
        assert!(Uuid::parse_str("jdoe").is_err());
    }
}
