//! Authentication and account-lifecycle orchestration.
//!
//! The login gates run in a fixed order: identify, email verified,
//! account active, password, MFA. Earlier gates never leak more than
//! later ones would.

use crate::error::{Result, ServerError};
use crate::mail::Mailer;
use crate::token::TokenManager;
use crate::user::{RegistrationDraft, User, UserService, UserStatus};
use crate::verification::{TokenPurpose, TokenService};

const UNVERIFIED_EMAIL: &str =
    "Email address has not been verified. Please check your inbox.";

/// How a fully checked login attempt concludes.
pub enum LoginOutcome {
    /// Password accepted, no MFA on the account. Carries a full
    /// session token.
    Session { user: User, token: String },
    /// Password accepted but the account requires a second factor.
    /// Carries a short-lived challenge token and no session.
    MfaChallenge { user: User, token: String },
}

/// Orchestrates registration, email verification and login on top of
/// the user and verification services.
#[derive(Clone)]
pub struct Authenticator {
    pub users: UserService,
    pub verifications: TokenService,
    signer: TokenManager,
    mailer: Mailer,
}

impl Authenticator {
    /// Create a new [`Authenticator`].
    pub fn new(
        users: UserService,
        verifications: TokenService,
        signer: TokenManager,
        mailer: Mailer,
    ) -> Self {
        Self {
            users,
            verifications,
            signer,
            mailer,
        }
    }

    /// Register a new account and send its email-verification link.
    ///
    /// The pre-checks on username and email give friendly conflicts;
    /// the unique indexes remain the authority when two registrations
    /// race, surfacing the loser as a conflict through the error
    /// classifier.
    pub async fn register(&self, draft: RegistrationDraft) -> Result<User> {
        if self.users.is_username_taken(&draft.username).await? {
            return Err(ServerError::Conflict(
                "Username is already in use. Please select a different one."
                    .to_owned(),
            ));
        }

        if self.users.is_email_taken(&draft.email).await? {
            return Err(ServerError::Conflict(
                "Email is already in use. Please select a different one."
                    .to_owned(),
            ));
        }

        let raw_code = self
            .verifications
            .issue(&draft.email, TokenPurpose::EmailVerification)
            .await?;
        self.mailer.send_verification(&draft.email, &raw_code).await?;

        let user = self.users.create(draft).await?;

        tracing::info!(user_id = %user.id, "account registered");
        Ok(user)
    }

    /// Redeem an email-verification code and stamp the account.
    pub async fn verify_email(
        &self,
        email: &str,
        code: &str,
        ip: Option<&str>,
    ) -> Result<()> {
        let Some(user) = self.users.repo.find_by_email(email).await? else {
            return Err(ServerError::invalid_credentials());
        };

        self.verifications
            .redeem(email, TokenPurpose::EmailVerification, code, ip)
            .await?;

        self.users.repo.mark_email_verified(user.id).await?;

        tracing::info!(user_id = %user.id, "email address verified");
        Ok(())
    }

    /// Whether the account behind `email` already has a verified
    /// address. Unknown accounts get the generic credential failure.
    pub async fn email_verified(&self, email: &str) -> Result<bool> {
        let Some(user) = self.users.repo.find_by_email(email).await? else {
            return Err(ServerError::invalid_credentials());
        };

        Ok(user.email_verified_at.is_some())
    }

    /// Run the login gates for an identifier/password pair.
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        ip: Option<&str>,
    ) -> Result<LoginOutcome> {
        let Some(user) = self.users.find_by_identifier(identifier).await?
        else {
            return Err(ServerError::invalid_credentials());
        };

        ensure_verified(&user)?;
        ensure_active(user.status)?;

        if !self.users.verify_password(&user, password)? {
            return Err(ServerError::invalid_credentials());
        }

        if user.is_multi_factor_enabled {
            let token = self.signer.create_mfa_challenge(&user.id.to_string())?;
            tracing::debug!(user_id = %user.id, "mfa challenge issued");
            return Ok(LoginOutcome::MfaChallenge { user, token });
        }

        self.users.repo.record_login(user.id, ip).await?;
        let token = self.signer.create_session(&user.id.to_string())?;

        tracing::info!(user_id = %user.id, "session issued");
        Ok(LoginOutcome::Session { user, token })
    }
}

/// Unverified accounts are told so explicitly; this gate runs before
/// the password check, so the message never confirms a credential.
fn ensure_verified(user: &User) -> Result<()> {
    if user.email_verified_at.is_none() {
        return Err(ServerError::BadRequest(UNVERIFIED_EMAIL.to_owned()));
    }

    Ok(())
}

/// Only `active` accounts may authenticate.
fn ensure_active(status: UserStatus) -> Result<()> {
    if status != UserStatus::Active {
        return Err(ServerError::Forbidden(format!(
            "Account access is restricted (status: {status})."
        )));
    }

    Ok(())
}
