use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::auth::LoginOutcome;
use crate::error::Result;
use crate::router::{MFA_COOKIE, SESSION_COOKIE, Valid, auth_cookie, client_ip};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    /// Email address or account id.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Identifier must be provided."
    ))]
    pub identifier: String,
    #[validate(length(
        min = 8,
        max = 255,
        message = "Password must contain at least 8 characters."
    ))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(rename = "mfaRequired", default)]
    pub mfa_required: bool,
}

/// Handler to authenticate a user.
pub async fn handler(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Valid(body): Valid<Body>,
) -> Result<(CookieJar, Json<Response>)> {
    let ip = client_ip(&headers);
    let development = state.config.environment.is_development();

    match state
        .auth
        .login(&body.identifier, &body.password, ip.as_deref())
        .await?
    {
        LoginOutcome::Session { token, .. } => {
            let jar = jar.add(auth_cookie(
                SESSION_COOKIE,
                token.clone(),
                state.token.session_ttl_secs(),
                development,
            ));

            Ok((
                jar,
                Json(Response {
                    success: true,
                    message: "Authentication successful.".to_owned(),
                    token: Some(token),
                    mfa_required: false,
                }),
            ))
        },
        LoginOutcome::MfaChallenge { token, .. } => {
            // No session yet: the challenge cookie only proves a
            // correct password to the completion flow.
            let jar = jar.add(auth_cookie(
                MFA_COOKIE,
                token,
                state.token.mfa_challenge_ttl_secs(),
                development,
            ));

            Ok((
                jar,
                Json(Response {
                    success: true,
                    message: "Multi-factor authentication required."
                        .to_owned(),
                    token: None,
                    mfa_required: true,
                }),
            ))
        },
    }
}
