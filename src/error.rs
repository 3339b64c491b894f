//! Error handler for Verdant.
//!
//! Every failure source (validation, credentials, persistence, mail,
//! token signatures) is classified into [`ServerError`] and rendered
//! as one uniform JSON envelope by [`crate::middleware::envelope`].

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::Error as SQLxError;
use thiserror::Error;
use validator::ValidationErrors;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Shared message for nonexistent accounts and wrong passwords, so a
/// caller cannot probe which accounts exist.
pub const INVALID_CREDENTIALS: &str = "Invalid identifier or credentials.";

const GENERIC_MESSAGE: &str =
    "An unexpected server error occurred. Please try again later.";

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Expired(String),

    #[error("{0}")]
    NotFound(String),

    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("SQL request failed: {0}")]
    Sql(#[from] SQLxError),

    #[error("token rejected: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("cryptographic failure: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error("mail delivery failed: {details}")]
    Mail { details: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ServerError {
    /// Generic credential failure, identical for unknown identifiers
    /// and wrong passwords.
    pub fn invalid_credentials() -> Self {
        Self::Auth(INVALID_CREDENTIALS.to_owned())
    }

    pub fn internal(details: impl Into<String>) -> Self {
        Self::Internal {
            details: details.into(),
            source: None,
        }
    }

    /// True when the error is an expected, user-recoverable outcome
    /// rather than an infrastructure fault. A unique violation is the
    /// registration-race backstop, so it counts as recoverable like
    /// the `Conflict` it surfaces as.
    pub fn is_operational(&self) -> bool {
        match self {
            Self::Sql(err) if is_unique_violation(err) => true,
            Self::Sql(_)
            | Self::Crypto(_)
            | Self::Mail { .. }
            | Self::Config(_)
            | Self::Internal { .. } => false,
            _ => true,
        }
    }

    /// Stable classifier name exposed in the error envelope.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auth(_) | Self::Forbidden(_) => "AuthError",
            Self::BadRequest(_) | Self::Conflict(_) | Self::Expired(_) => {
                "BadRequestError"
            },
            Self::NotFound(_) => "NotFoundError",
            Self::Validation(_) | Self::Axum(_) => "InvalidParameterError",
            Self::Sql(err) if is_unique_violation(err) => "BadRequestError",
            Self::Sql(_) => "DatabaseError",
            Self::Token(_) => "AuthError",
            Self::Config(_) => "ConfigError",
            Self::Crypto(_) | Self::Mail { .. } | Self::Internal { .. } => {
                "ApiError"
            },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) | Self::Validation(_) | Self::Axum(_) => {
                StatusCode::BAD_REQUEST
            },
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Expired(_) => StatusCode::GONE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            // A duplicate insert slipping past the pre-checks must
            // surface as a conflict, not a server fault.
            Self::Sql(err) if is_unique_violation(err) => {
                StatusCode::CONFLICT
            },
            Self::Token(_) => StatusCode::UNAUTHORIZED,
            Self::Sql(_)
            | Self::Crypto(_)
            | Self::Mail { .. }
            | Self::Config(_)
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn is_unique_violation(err: &SQLxError) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

/// Classified error pieces, attached to the response as an extension
/// so the envelope middleware can add request context.
#[derive(Debug, Clone)]
pub struct ErrorParts {
    pub name: &'static str,
    pub status: StatusCode,
    pub message: String,
    pub operational: bool,
    pub details: Option<String>,
    pub cause: Option<String>,
}

impl ErrorParts {
    /// Client-facing message: infrastructure faults are reduced to a
    /// generic message outside development mode.
    pub fn public_message(&self, development: bool) -> &str {
        if self.operational || development {
            &self.message
        } else {
            GENERIC_MESSAGE
        }
    }
}

/// Final envelope body, completed with request context by the
/// middleware.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope<'a> {
    pub success: bool,
    pub timestamp: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub error: ErrorBody<'a>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub name: &'a str,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<&'a str>,
}

impl From<&ServerError> for ErrorParts {
    fn from(err: &ServerError) -> Self {
        let (message, details, cause) = match err {
            ServerError::Validation(validation_errors) => (
                parse_validation_errors(validation_errors),
                Some(validation_errors.to_string()),
                None,
            ),
            ServerError::Sql(sql_err) if is_unique_violation(sql_err) => (
                "Value is already in use. Please select a different one."
                    .to_owned(),
                sql_err
                    .as_database_error()
                    .map(|db_err| db_err.to_string()),
                None,
            ),
            ServerError::Sql(sql_err) => (
                "A database operation failed. Please try again later."
                    .to_owned(),
                Some(sql_err.to_string()),
                None,
            ),
            ServerError::Token(token_err) => (
                match token_err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        "Authorization token has expired. Access denied."
                    },
                    _ => "Invalid authorization token. Access denied.",
                }
                .to_owned(),
                Some(token_err.to_string()),
                None,
            ),
            ServerError::Internal { details, source } => (
                err.to_string(),
                Some(details.clone()),
                source.as_ref().map(|s| s.to_string()),
            ),
            ServerError::Mail { details } => (
                "Failed to deliver verification token by email. Please try again later."
                    .to_owned(),
                Some(details.clone()),
                None,
            ),
            _ => (err.to_string(), None, None),
        };

        ErrorParts {
            name: err.name(),
            status: err.status_code(),
            message,
            operational: err.is_operational(),
            details,
            cause,
        }
    }
}

fn parse_validation_errors(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| {
                issue
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for '{field}'."))
            })
        })
        .collect();
    messages.sort();
    messages.join(" ")
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let parts = ErrorParts::from(&self);

        if parts.operational {
            tracing::debug!(name = parts.name, status = %parts.status, message = parts.message, "request rejected");
        } else {
            tracing::error!(name = parts.name, details = ?parts.details, cause = ?parts.cause, "server returned 500-class status");
        }

        // Minimal body as fallback; the envelope middleware replaces it
        // with the full, request-aware envelope.
        let body = serde_json::json!({
            "success": false,
            "error": {
                "name": parts.name,
                "statusCode": parts.status.as_u16(),
                "message": parts.message,
            },
        })
        .to_string();

        let mut response = Response::builder()
            .status(parts.status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap_or_else(|_| internal_server_error());
        response.extensions_mut().insert(parts);
        response
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "success": false,
                "error": {
                    "name": "ApiError",
                    "statusCode": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                    "message": GENERIC_MESSAGE,
                },
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ServerError::invalid_credentials().status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServerError::Forbidden("suspended".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServerError::BadRequest("unverified".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::Conflict("taken".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServerError::Expired("stale".into()).status_code(),
            StatusCode::GONE
        );
        assert_eq!(
            ServerError::internal("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_operational_flags() {
        assert!(ServerError::invalid_credentials().is_operational());
        assert!(ServerError::Conflict("taken".into()).is_operational());
        assert!(!ServerError::internal("boom").is_operational());
        assert!(
            !ServerError::Mail {
                details: "relay down".into()
            }
            .is_operational()
        );
    }

    #[test]
    fn test_public_message_hides_internal_detail() {
        let parts = ErrorParts::from(&ServerError::internal("pool timeout"));
        assert_eq!(parts.public_message(false), GENERIC_MESSAGE);
        assert!(parts.public_message(true).contains("pool timeout"));

        let parts = ErrorParts::from(&ServerError::invalid_credentials());
        assert_eq!(parts.public_message(false), INVALID_CREDENTIALS);
    }

    #[test]
    fn test_enumeration_resistance_shares_message() {
        let unknown = ErrorParts::from(&ServerError::invalid_credentials());
        let wrong_password =
            ErrorParts::from(&ServerError::invalid_credentials());
        assert_eq!(unknown.message, wrong_password.message);
        assert_eq!(unknown.status, wrong_password.status);
    }
}
