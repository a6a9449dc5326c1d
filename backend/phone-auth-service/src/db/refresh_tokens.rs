/// Refresh token persistence
use crate::error::Result;
use crate::models::RefreshToken;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(&self, token: &RefreshToken) -> Result<()>;

    /// Delete and return the token with this hash; a second caller gets `None`
    async fn take_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>>;

    /// Delete one of the user's tokens
    async fn delete_by_hash(&self, user_id: Uuid, token_hash: &str) -> Result<bool>;

    /// Delete every token of the user; returns how many were removed
    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64>;
}

#[derive(Clone)]
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
    async fn insert(&self, token: &RefreshToken) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (
                id, user_id, token_hash, expires_at, last_used_at,
                ip_address, user_agent, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.last_used_at)
        .bind(&token.ip_address)
        .bind(&token.user_agent)
        .bind(token.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn take_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        let token = sqlx::query_as::<_, RefreshToken>(
            r#"
            DELETE FROM refresh_tokens
            WHERE token_hash = $1
            RETURNING id, user_id, token_hash, expires_at, last_used_at,
                      ip_address, user_agent, created_at
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    async fn delete_by_hash(&self, user_id: Uuid, token_hash: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1 AND token_hash = $2")
                .bind(user_id)
                .bind(token_hash)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
