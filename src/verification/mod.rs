mod repository;
mod service;

pub use repository::*;
pub use service::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One-time, purpose-scoped proof of email ownership, as saved on
/// database. Only the hash of the random code is stored; the raw code
/// travels out-of-band and is never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct VerificationToken {
    pub id: Uuid,
    pub email: String,
    #[serde(skip)]
    pub code_hash: String,
    #[sqlx(try_from = "String")]
    pub purpose: TokenPurpose,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    pub consumed_at: Option<DateTime<Utc>>,
    pub consumed_by_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The reason a token was issued. A token is only redeemable for the
/// purpose it was issued under.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    #[default]
    EmailVerification,
    AccountRecovery,
    MultiFactorVerification,
}

impl TokenPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenPurpose::EmailVerification => "email_verification",
            TokenPurpose::AccountRecovery => "account_recovery",
            TokenPurpose::MultiFactorVerification => {
                "multi_factor_verification"
            },
        }
    }
}

impl std::fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for TokenPurpose {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "email_verification" => Ok(TokenPurpose::EmailVerification),
            "account_recovery" => Ok(TokenPurpose::AccountRecovery),
            "multi_factor_verification" => {
                Ok(TokenPurpose::MultiFactorVerification)
            },
            other => Err(format!("unknown token purpose '{other}'")),
        }
    }
}
