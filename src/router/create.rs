use axum::extract::State;
use axum::http::{StatusCode, header};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::Valid;
use crate::user::RegistrationDraft;

const VERIFY_NOTICE: &str = "/verify-notice";

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(custom(
        function = "crate::router::validate_name",
        message = "Name must be 5-50 letters, spaces or hyphens."
    ))]
    pub name: String,
    #[validate(custom(
        function = "crate::router::validate_username",
        message = "Username must be 2-16 characters and start with a letter."
    ))]
    pub username: String,
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(
        length(
            min = 8,
            max = 255,
            message = "Password must contain at least 8 characters."
        ),
        custom(
            function = "crate::router::validate_password",
            message = "Password must mix upper case, lower case and digits."
        )
    )]
    pub password: String,
    /// Stored filename of an already-uploaded picture.
    pub profile_picture: Option<String>,
}

/// Handler to register an account.
///
/// The verification mail goes out before the row lands, so a delivery
/// failure never leaves an account nobody can verify.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<(StatusCode, [(header::HeaderName, &'static str); 1])> {
    state
        .auth
        .register(RegistrationDraft {
            profile_picture: body.profile_picture,
            name: body.name,
            username: body.username.to_lowercase(),
            email: body.email.to_lowercase(),
            password: body.password,
        })
        .await?;

    Ok((StatusCode::FOUND, [(header::LOCATION, VERIFY_NOTICE)]))
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;
    use crate::*;
    use axum::http::Method;
    use serde_json::json;
    use sqlx::{Pool, Postgres};

    pub fn registration_body(email: &str, username: &str) -> String {
        json!(Body {
            name: "Jane Doe".into(),
            username: username.into(),
            email: email.into(),
            password: "Secret123!".into(),
            profile_picture: None,
        })
        .to_string()
    }

    #[sqlx::test]
    async fn test_register_redirects_and_seeds_token(pool: Pool<Postgres>) {
        let state = router::state(pool.clone());
        let app = app(state.clone());

        let response = make_request(
            app,
            Method::POST,
            "/users",
            registration_body("jane@example.com", "jane"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            VERIFY_NOTICE
        );

        let user = state
            .auth
            .users
            .repo
            .find_by_email("jane@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.email_verified_at, None);
        assert_eq!(user.username, "jane");
        assert_eq!(user.profile_picture, "default.png");

        let token = state
            .auth
            .verifications
            .repo
            .find_latest_unconsumed(
                "jane@example.com",
                verification::TokenPurpose::EmailVerification,
            )
            .await
            .unwrap()
            .unwrap();
        assert!(!token.consumed);
        assert!(token.expires_at > chrono::Utc::now());

        // Exactly one token exists for the address.
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM verification_tokens WHERE email = $1",
        )
        .bind("jane@example.com")
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
    }

    #[sqlx::test]
    async fn test_register_rejects_weak_password(pool: Pool<Postgres>) {
        let state = router::state(pool);
        let app = app(state.clone());

        let body = json!({
            "name": "Jane Doe",
            "username": "jane",
            "email": "jane@example.com",
            "password": "alllowercase1",
        })
        .to_string();
        let response =
            make_request(app, Method::POST, "/users", body).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    async fn test_register_conflicts(pool: Pool<Postgres>) {
        let state = router::state(pool);

        let response = make_request(
            app(state.clone()),
            Method::POST,
            "/users",
            registration_body("jane@example.com", "jane"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);

        // Same username, different email.
        let response = make_request(
            app(state.clone()),
            Method::POST,
            "/users",
            registration_body("other@example.com", "jane"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // Same email, different username.
        let response = make_request(
            app(state.clone()),
            Method::POST,
            "/users",
            registration_body("jane@example.com", "janedoe"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[sqlx::test]
    async fn test_unique_index_backstops_insert_race(pool: Pool<Postgres>) {
        use crate::user::NewUser;

        let state = router::state(pool);
        let new_user = NewUser {
            profile_picture: "default.png".into(),
            name: "Jane Doe".into(),
            username: "jane".into(),
            email: "jane@example.com".into(),
            password_hash: "phc".into(),
            secret_pin_hash: None,
            is_multi_factor_enabled: false,
        };

        state.auth.users.repo.insert(&new_user).await.unwrap();

        // A duplicate slipping past the pre-checks must classify as a
        // conflict, not a server fault.
        let err = state.auth.users.repo.insert(&new_user).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(err.is_operational());
        assert_eq!(err.name(), "BadRequestError");

        // The conflict message reaches the caller even outside
        // development mode.
        let parts = crate::error::ErrorParts::from(&err);
        assert_eq!(
            parts.public_message(false),
            "Value is already in use. Please select a different one."
        );
    }
}
