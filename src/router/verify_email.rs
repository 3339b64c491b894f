use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Html;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::router::{Valid, client_ip};

const LOGIN: &str = "/login";

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(
        min = 1,
        max = 255,
        message = "Verification code must be provided."
    ))]
    pub code: String,
}

/// Handler to redeem a verification code.
pub async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Valid(body): Valid<Body>,
) -> Result<(StatusCode, [(header::HeaderName, &'static str); 1])> {
    let ip = client_ip(&headers);

    state
        .auth
        .verify_email(&body.email.to_lowercase(), &body.code, ip.as_deref())
        .await?;

    Ok((StatusCode::FOUND, [(header::LOCATION, LOGIN)]))
}

#[derive(Debug, Deserialize)]
pub struct Params {
    pub email: String,
    pub code: String,
}

/// Bridge for links opened from a mail client.
///
/// Mail scanners and previews follow GETs, so the GET never redeems
/// anything. It renders a form that immediately re-submits the code as
/// a POST.
pub async fn bridge(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Html<String>> {
    let email = params.email.to_lowercase();

    if state.auth.email_verified(&email).await? {
        return Err(ServerError::BadRequest(
            "Email address is already verified.".to_owned(),
        ));
    }

    Ok(Html(format!(
        r#"<!DOCTYPE html>
<html>
  <body onload="document.forms[0].submit()">
    <form method="post" action="/auth/verify-email">
      <input type="hidden" name="email" value="{}">
      <input type="hidden" name="code" value="{}">
      <noscript><button type="submit">Verify email</button></noscript>
    </form>
  </body>
</html>"#,
        escape(&email),
        escape(&params.code),
    )))
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
