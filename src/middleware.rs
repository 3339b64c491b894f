//! Request-aware error envelope.
//!
//! Handlers return [`crate::error::ServerError`], whose response
//! carries classified [`ErrorParts`] as an extension. This layer owns
//! the request context (method, path, request id) and rewrites the
//! body into the full envelope, so every failure leaves the service
//! with one shape.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderName, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{SecondsFormat, Utc};

use crate::config::Configuration;
use crate::error::{ErrorBody, ErrorEnvelope, ErrorParts};

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

pub async fn envelope(
    State(config): State<Arc<Configuration>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_owned();
    let request_id = req
        .headers()
        .get(&REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let response = next.run(req).await;

    let Some(parts) = response.extensions().get::<ErrorParts>().cloned()
    else {
        return response;
    };

    let development = config.environment.is_development();
    let body = render(&parts, development, &request_id, &method, &path);

    Response::builder()
        .status(parts.status)
        .header(header::CONTENT_TYPE, "application/json")
        .header(&REQUEST_ID, request_id.as_str())
        .body(body.into())
        .unwrap_or(response)
}

/// Serialize the full envelope. Error details and cause are only
/// exposed in development mode.
fn render(
    parts: &ErrorParts,
    development: bool,
    request_id: &str,
    method: &str,
    path: &str,
) -> String {
    let envelope = ErrorEnvelope {
        success: false,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        request_id: request_id.to_owned(),
        method: method.to_owned(),
        path: path.to_owned(),
        error: ErrorBody {
            name: parts.name,
            status_code: parts.status.as_u16(),
            message: parts.public_message(development),
            details: if development {
                parts.details.as_deref()
            } else {
                None
            },
            cause: if development { parts.cause.as_deref() } else { None },
        },
    };

    serde_json::to_string(&envelope).unwrap_or_else(|_| {
        r#"{"success":false,"error":{"name":"ApiError","statusCode":500,"message":"An unexpected server error occurred. Please try again later."}}"#.to_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;

    #[test]
    fn test_envelope_carries_request_context() {
        let parts = ErrorParts::from(&ServerError::invalid_credentials());
        let body =
            render(&parts, true, "req-42", "POST", "/auth/login");
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["requestId"], "req-42");
        assert_eq!(json["method"], "POST");
        assert_eq!(json["path"], "/auth/login");
        assert_eq!(json["error"]["name"], "AuthError");
        assert_eq!(json["error"]["statusCode"], 401);
    }

    #[test]
    fn test_production_hides_details_and_cause() {
        let parts = ErrorParts::from(&ServerError::internal("pool timeout"));

        let dev: serde_json::Value = serde_json::from_str(&render(
            &parts, true, "r", "GET", "/",
        ))
        .unwrap();
        assert_eq!(dev["error"]["details"], "pool timeout");

        let prod: serde_json::Value = serde_json::from_str(&render(
            &parts, false, "r", "GET", "/",
        ))
        .unwrap();
        assert!(prod["error"].get("details").is_none());
        assert!(prod["error"].get("cause").is_none());
        assert_eq!(
            prod["error"]["message"],
            "An unexpected server error occurred. Please try again later."
        );
    }
}
