//! database (db) union structure.

use std::time::Duration;

use axum::extract::FromRef;
use rand::Rng;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::AppState;
use crate::config::Retry;

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "verdant";
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Custom db structure to pass to Axum.
#[derive(Clone)]
pub struct Database {
    pub postgres: PgPool,
}

impl Database {
    /// Init database connections.
    ///
    /// The connection attempt is retried with exponential backoff and
    /// jitter until `retry.max_attempts` is exhausted, then the last
    /// error is returned.
    pub async fn new(
        hostname: &str,
        username: &str,
        password: &str,
        db: &str,
        pool: u32,
        retry: &Retry,
    ) -> Result<Self, sqlx::Error> {
        let addr = format!("postgres://{username}:{password}@{hostname}/{db}");
        let attempts = retry.max_attempts.max(1);

        for attempt in 1..=attempts {
            match PgPoolOptions::new()
                .max_connections(pool)
                .connect(&addr)
                .await
            {
                Ok(postgres) => {
                    tracing::info!(%hostname, %db, "postgres connected");
                    return Ok(Self { postgres });
                },
                Err(err) if attempt < attempts => {
                    let delay = backoff_delay(retry, attempt, jitter(retry));
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "postgres connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(err) => {
                    tracing::error!(
                        attempts,
                        error = %err,
                        "all postgres connection attempts exhausted"
                    );
                    return Err(err);
                },
            }
        }

        unreachable!("retry loop either connects or returns the last error")
    }
}

/// Delay before the given 1-based attempt retries: exponential growth
/// from the base delay, shifted by a signed jitter, floored at zero.
fn backoff_delay(retry: &Retry, attempt: u32, jitter_ms: i64) -> Duration {
    let exponential = retry
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));

    let delayed = (exponential as i64).saturating_add(jitter_ms).max(0);
    Duration::from_millis(delayed as u64)
}

fn jitter(retry: &Retry) -> i64 {
    if retry.jitter_ms == 0 {
        return 0;
    }
    let spread = retry.jitter_ms as i64;
    rand::thread_rng().gen_range(-spread..=spread)
}

impl FromRef<AppState> for Database {
    fn from_ref(app_state: &AppState) -> Database {
        app_state.db.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retry() -> Retry {
        Retry {
            max_attempts: 4,
            base_delay_ms: 1_000,
            jitter_ms: 300,
        }
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let retry = retry();
        assert_eq!(backoff_delay(&retry, 1, 0), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(&retry, 2, 0), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(&retry, 3, 0), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(&retry, 4, 0), Duration::from_millis(8_000));
    }

    #[test]
    fn test_backoff_applies_signed_jitter() {
        let retry = retry();
        assert_eq!(
            backoff_delay(&retry, 1, 300),
            Duration::from_millis(1_300)
        );
        assert_eq!(
            backoff_delay(&retry, 1, -300),
            Duration::from_millis(700)
        );
    }

    #[test]
    fn test_backoff_never_goes_negative() {
        let retry = Retry {
            max_attempts: 2,
            base_delay_ms: 100,
            jitter_ms: 1_000,
        };
        assert_eq!(backoff_delay(&retry, 1, -1_000), Duration::ZERO);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let retry = retry();
        for _ in 0..64 {
            let jitter_ms = jitter(&retry);
            assert!(jitter_ms.abs() <= retry.jitter_ms as i64);
        }
        let no_jitter = Retry {
            jitter_ms: 0,
            ..retry
        };
        assert_eq!(jitter(&no_jitter), 0);
    }
}
