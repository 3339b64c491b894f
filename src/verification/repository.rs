//! Handle database requests for verification tokens.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::Result;
use crate::verification::{TokenPurpose, VerificationToken};

#[derive(Clone)]
pub struct TokenRepository {
    pool: Pool<Postgres>,
}

impl TokenRepository {
    /// Create a new [`TokenRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert a freshly issued token.
    pub async fn insert(
        &self,
        email: &str,
        code_hash: &str,
        purpose: TokenPurpose,
        expires_at: DateTime<Utc>,
    ) -> Result<VerificationToken> {
        let token = sqlx::query_as::<_, VerificationToken>(
            r#"INSERT INTO verification_tokens (email, code_hash, purpose, expires_at)
                VALUES ($1, $2, $3, $4)
                RETURNING *"#,
        )
        .bind(email)
        .bind(code_hash)
        .bind(purpose.as_str())
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(token)
    }

    /// Most recently created unconsumed, unexpired token for
    /// email+purpose. This is the authoritative token for redemption.
    pub async fn find_latest_active(
        &self,
        email: &str,
        purpose: TokenPurpose,
    ) -> Result<Option<VerificationToken>> {
        let token = sqlx::query_as::<_, VerificationToken>(
            r#"SELECT * FROM verification_tokens
                WHERE email = $1 AND purpose = $2 AND consumed = FALSE
                    AND expires_at > NOW()
                ORDER BY created_at DESC
                LIMIT 1"#,
        )
        .bind(email)
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    /// Most recently created unconsumed token for email+purpose,
    /// expired or not. Lets the caller distinguish an expired token
    /// from a missing one.
    pub async fn find_latest_unconsumed(
        &self,
        email: &str,
        purpose: TokenPurpose,
    ) -> Result<Option<VerificationToken>> {
        let token = sqlx::query_as::<_, VerificationToken>(
            r#"SELECT * FROM verification_tokens
                WHERE email = $1 AND purpose = $2 AND consumed = FALSE
                ORDER BY created_at DESC
                LIMIT 1"#,
        )
        .bind(email)
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    /// Flip `consumed` false -> true, stamping when and from where.
    ///
    /// The update is conditional on the token still being unconsumed,
    /// so two concurrent redemptions can never both succeed; returns
    /// whether this call won.
    pub async fn consume(&self, id: Uuid, ip: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE verification_tokens
                SET consumed = TRUE, consumed_at = NOW(), consumed_by_ip = $2, updated_at = NOW()
                WHERE id = $1 AND consumed = FALSE"#,
        )
        .bind(id)
        .bind(ip)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
