/// Refresh Token Store
///
/// Persists the SHA-256 digest of every issued refresh token with its owner and
/// expiry. Revocation is physical deletion: a deleted row can never validate
/// again. A user may hold any number of rows at once (one per session).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Insert a new row. Existing rows are never updated.
    async fn store(
        &self,
        user_id: Uuid,
        token_digest: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// True iff a row with this digest belongs to `user_id` and has not expired.
    async fn is_valid(&self, token_digest: &str, user_id: Uuid) -> Result<bool, AppError>;

    /// Delete the row with this digest. Returns the number of rows removed.
    async fn revoke(&self, token_digest: &str) -> Result<u64, AppError>;

    /// Delete every row owned by `user_id`. Returns the number of rows removed.
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError>;
}

pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn store(
        &self,
        user_id: Uuid,
        token_digest: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(token_digest)
        .bind(expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_valid(&self, token_digest: &str, user_id: Uuid) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM refresh_tokens
                WHERE token_hash = $1 AND user_id = $2 AND expires_at > NOW()
            )
            "#,
        )
        .bind(token_digest)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn revoke(&self, token_digest: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_digest)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        tracing::info!(user_id = %user_id, revoked = result.rows_affected(), "All refresh tokens revoked for user");
        Ok(result.rows_affected())
    }
}
