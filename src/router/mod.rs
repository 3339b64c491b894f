//! HTTP routes and request plumbing.

pub mod create;
pub mod login;
pub mod status;
pub mod verify_email;

use std::sync::LazyLock;

use axum::extract::{Form, FromRequest, Request};
use axum::http::{HeaderMap, header};
use axum::{Json, RequestExt};
use axum_extra::extract::cookie::{Cookie, SameSite};
use regex_lite::Regex;
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationError};

use crate::AppState;
use crate::error::ServerError;

pub const SESSION_COOKIE: &str = "session-token";
pub const MFA_COOKIE: &str = "mfa-token";

static NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z \-]{3,48}[A-Za-z]$")
        .expect("name pattern must compile")
});

static USERNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_\-]{1,15}$")
        .expect("username pattern must compile")
});

/// Body extractor that rejects invalid payloads before the handler
/// runs. JSON is the default; urlencoded forms are accepted too so the
/// email-verification bridge can re-submit through a plain form. Both
/// malformed bodies and failed field validation land in the error
/// envelope.
pub struct Valid<T>(pub T);

impl<T> FromRequest<AppState> for Valid<T>
where
    T: DeserializeOwned + Validate + Send + 'static,
{
    type Rejection = ServerError;

    async fn from_request(
        req: Request,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| {
                value.starts_with("application/x-www-form-urlencoded")
            });

        let body = if form {
            let Form(body) = req
                .extract::<Form<T>, _>()
                .await
                .map_err(|err| ServerError::BadRequest(err.body_text()))?;
            body
        } else {
            let Json(body) = req.extract::<Json<T>, _>().await?;
            body
        };
        body.validate()?;

        Ok(Valid(body))
    }
}

/// Display names: letters, spaces and hyphens, bounded length.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if NAME.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("name"))
    }
}

/// Usernames start with a letter; letters, digits, `_` and `-` after.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if USERNAME.is_match(username) {
        Ok(())
    } else {
        Err(ValidationError::new("username"))
    }
}

/// Passwords mix upper case, lower case and a digit.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if has_upper && has_lower && has_digit {
        Ok(())
    } else {
        Err(ValidationError::new("password"))
    }
}

/// Authentication cookie: httpOnly, strict same-site, `Secure` outside
/// development, lifetime identical to the token it carries.
pub fn auth_cookie(
    name: &'static str,
    token: String,
    max_age_secs: u64,
    development: bool,
) -> Cookie<'static> {
    Cookie::build((name, token))
        .http_only(true)
        .secure(!development)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::seconds(max_age_secs as i64))
        .build()
}

/// Requester address as reported by the front proxy; absent when the
/// request carries no forwarding header.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|list| list.split(',').next())
        .map(|ip| ip.trim().to_owned())
        .filter(|ip| !ip.is_empty())
}

/// MUST NEVER be used in production.
#[cfg(test)]
pub fn state(pool: sqlx::Pool<sqlx::Postgres>) -> AppState {
    use std::sync::Arc;

    use crate::auth::Authenticator;
    use crate::config::Configuration;
    use crate::crypto::Crypto;
    use crate::database::Database;
    use crate::mail::Mailer;
    use crate::token::TokenManager;
    use crate::user::UserService;
    use crate::verification::TokenService;

    let mut config = Configuration::default();
    config.name = "verdant-test".to_owned();
    config.url = "https://auth.test/".to_owned();
    let config = Arc::new(config);
    let crypto = Arc::new(Crypto::new(None).expect("cannot build crypto"));
    let token =
        TokenManager::new(&config.url, "test-secret", &config.token);
    let mailer = Mailer {
        base_url: config.url.clone(),
        ..Mailer::default()
    };

    let users = UserService::new(pool.clone(), Arc::clone(&crypto));
    let verifications = TokenService::new(
        pool.clone(),
        Arc::clone(&crypto),
        config.token.verification_ttl_secs,
    );
    let auth = Authenticator::new(
        users,
        verifications,
        token.clone(),
        mailer.clone(),
    );

    AppState {
        config,
        db: Database { postgres: pool },
        crypto,
        token,
        mail: mailer,
        auth,
    }
}

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn seed_user(
    state: &AppState,
    email: &str,
    username: &str,
    password: &str,
    verified: bool,
    mfa: bool,
) -> crate::user::User {
    use crate::user::NewUser;

    let repo = &state.auth.users.repo;
    let user = repo
        .insert(&NewUser {
            profile_picture: "default.png".into(),
            name: "Jane Doe".into(),
            username: username.into(),
            email: email.into(),
            password_hash: state
                .crypto
                .pwd
                .hash(password.to_owned())
                .expect("cannot hash password"),
            secret_pin_hash: None,
            is_multi_factor_enabled: mfa,
        })
        .await
        .expect("cannot insert user");

    if !verified {
        return user;
    }

    repo.mark_email_verified(user.id)
        .await
        .expect("cannot mark email verified");
    repo.find_by_id(user.id)
        .await
        .expect("cannot reload user")
        .expect("user must exist")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test]
    async fn test_unknown_route_shares_error_envelope(
        pool: sqlx::Pool<sqlx::Postgres>,
    ) {
        use axum::http::{Method, StatusCode};
        use http_body_util::BodyExt;

        use crate::{app, make_request};

        let response = make_request(
            app(state(pool)),
            Method::GET,
            "/nope",
            String::default(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["name"], "NotFoundError");
        assert_eq!(body["error"]["statusCode"], 404);
        assert_eq!(body["path"], "/nope");
    }

    #[test]
    fn test_name_rules() {
        assert!(validate_name("Jane Doe").is_ok());
        assert!(validate_name("Anne-Marie Dupont").is_ok());
        assert!(validate_name("Jo").is_err());
        assert!(validate_name("Jane4 Doe").is_err());
        assert!(validate_name(&"a".repeat(51)).is_err());
    }

    #[test]
    fn test_username_rules() {
        assert!(validate_username("jane").is_ok());
        assert!(validate_username("j4ne_doe-1").is_ok());
        assert!(validate_username("j").is_err());
        assert!(validate_username("4jane").is_err());
        assert!(validate_username("jane doe").is_err());
        assert!(validate_username(&"a".repeat(17)).is_err());
    }

    #[test]
    fn test_password_rules() {
        assert!(validate_password("Secret123").is_ok());
        assert!(validate_password("secret123").is_err());
        assert!(validate_password("SECRET123").is_err());
        assert!(validate_password("Secretive").is_err());
    }

    #[test]
    fn test_auth_cookie_attributes() {
        let cookie = auth_cookie(SESSION_COOKIE, "jwt".into(), 86_400, false);
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(
            cookie.max_age(),
            Some(time::Duration::seconds(86_400))
        );

        let dev = auth_cookie(MFA_COOKIE, "jwt".into(), 3_600, true);
        assert_eq!(dev.secure(), Some(false));
    }
}
