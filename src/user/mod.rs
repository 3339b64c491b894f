mod repository;
mod service;

pub use repository::*;
pub use service::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: UserStatus,
    pub profile_picture: String,
    pub name: String,
    pub username: String,
    pub email: String,
    pub email_verified_at: Option<DateTime<Utc>>,
    /// Argon2 PHC string. Never serialized.
    #[serde(skip)]
    pub password: String,
    /// Argon2 PHC string. Never serialized.
    #[serde(skip)]
    pub secret_pin: Option<String>,
    pub is_multi_factor_enabled: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub last_login_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How the authentication system responds to a user's login attempt.
/// Only `active` accounts may authenticate.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    /// Temporarily prevented from authenticating.
    Lock,
    /// Prevented from authenticating until an administrator intervenes.
    Suspend,
    /// Permanently banned.
    Blacklist,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Lock => "lock",
            UserStatus::Suspend => "suspend",
            UserStatus::Blacklist => "blacklist",
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for UserStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "active" => Ok(UserStatus::Active),
            "lock" => Ok(UserStatus::Lock),
            "suspend" => Ok(UserStatus::Suspend),
            "blacklist" => Ok(UserStatus::Blacklist),
            other => Err(format!("unknown user status '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            UserStatus::Active,
            UserStatus::Lock,
            UserStatus::Suspend,
            UserStatus::Blacklist,
        ] {
            let parsed =
                UserStatus::try_from(status.as_str().to_owned()).unwrap();
            assert_eq!(parsed, status);
        }
        assert!(UserStatus::try_from("deleted".to_owned()).is_err());
    }
}
