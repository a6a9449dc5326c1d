/// Account persistence
use crate::error::Result;
use crate::models::User;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Return the account for `phone`, creating an active one if absent
    async fn find_or_create_by_phone(&self, phone: &str, now: DateTime<Utc>) -> Result<User>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_or_create_by_phone(&self, phone: &str, now: DateTime<Utc>) -> Result<User> {
        // The no-op update makes RETURNING yield the existing row on conflict
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, phone, is_active, created_at)
            VALUES ($1, $2, TRUE, $3)
            ON CONFLICT (phone) DO UPDATE SET phone = EXCLUDED.phone
            RETURNING id, phone, is_active, created_at, last_login_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(phone)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, phone, is_active, created_at, last_login_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
