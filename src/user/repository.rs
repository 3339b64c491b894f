//! Handle database requests for the user aggregate.

use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::{Result, ServerError};
use crate::user::User;

const USER_COLUMNS: &str = r#"
    id,
    status,
    profile_picture,
    name,
    username,
    email,
    email_verified_at,
    password,
    secret_pin,
    is_multi_factor_enabled,
    last_login_at,
    last_login_ip,
    created_at,
    updated_at
"#;

/// New user record; credential fields must already be hashed.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub profile_picture: String,
    pub name: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub secret_pin_hash: Option<String>,
    pub is_multi_factor_enabled: bool,
}

#[derive(Clone)]
pub struct UserRepository {
    pool: Pool<Postgres>,
}

impl UserRepository {
    /// Create a new [`UserRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert a [`NewUser`] into database.
    ///
    /// The unique indexes on `email` and `username` are the final word
    /// on duplicates; a violation surfaces as a conflict even when the
    /// handler pre-checks raced with another registration.
    pub async fn insert(&self, user: &NewUser) -> Result<User> {
        let query = format!(
            r#"INSERT INTO users
                (profile_picture, name, username, email, password, secret_pin, is_multi_factor_enabled)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING {USER_COLUMNS}"#
        );

        let user = sqlx::query_as::<_, User>(&query)
            .bind(&user.profile_picture)
            .bind(&user.name)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.secret_pin_hash)
            .bind(user.is_multi_factor_enabled)
            .fetch_one(&self.pool)
            .await?;

        Ok(user)
    }

    /// Find a user using the `id` field.
    pub async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        let query =
            format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");

        let user = sqlx::query_as::<_, User>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Find a user using the `email` field.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let query =
            format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");

        let user = sqlx::query_as::<_, User>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Find a user using the `username` field.
    pub async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<User>> {
        let query =
            format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");

        let user = sqlx::query_as::<_, User>(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Stamp the email as verified.
    pub async fn mark_email_verified(&self, user_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE users
                SET email_verified_at = NOW(), updated_at = NOW()
                WHERE id = $1"#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(ServerError::internal(
                "failed to update user profile after verification",
            ));
        }

        Ok(())
    }

    /// Record login-audit metadata. Losing this update is a server
    /// fault, not something to ignore.
    pub async fn record_login(
        &self,
        user_id: Uuid,
        ip: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE users
                SET last_login_at = NOW(), last_login_ip = $2, updated_at = NOW()
                WHERE id = $1"#,
        )
        .bind(user_id)
        .bind(ip)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(ServerError::internal(
                "failed to record login metadata",
            ));
        }

        Ok(())
    }
}
