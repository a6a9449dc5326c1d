/// OTP code persistence
use crate::error::Result;
use crate::models::OtpRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Storage for outstanding codes, keyed by phone
///
/// `consume` and `record_failed_attempt` are conditional on the stored hash so
/// a code replaced by a newer one can neither be redeemed nor burn the new
/// code's attempts.
#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Replace any existing record for the phone
    async fn upsert(&self, record: &OtpRecord) -> Result<()>;

    async fn find(&self, phone: &str) -> Result<Option<OtpRecord>>;

    async fn delete(&self, phone: &str) -> Result<()>;

    /// Delete the record only while it still carries `code_hash`
    async fn delete_if_hash(&self, phone: &str, code_hash: &str) -> Result<bool>;

    /// Atomically delete the record iff it still carries `code_hash`, is
    /// unexpired at `now` and has attempts left. Only one caller can win.
    async fn consume(&self, phone: &str, code_hash: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Atomically decrement the remaining attempts; returns the new count, or
    /// `None` when the record is gone, replaced or already exhausted
    async fn record_failed_attempt(
        &self,
        phone: &str,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>>;

    /// Point the record at the delivery log of the SMS that carried it
    async fn link_delivery_log(&self, phone: &str, code_hash: &str, log_id: Uuid) -> Result<bool>;
}

#[derive(Clone)]
pub struct PgOtpStore {
    pool: PgPool,
}

impl PgOtpStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OtpStore for PgOtpStore {
    async fn upsert(&self, record: &OtpRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO otp_codes (
                phone, code_hash, attempts_remaining, expires_at,
                last_attempt_at, last_sent_at, delivery_log_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (phone) DO UPDATE
            SET code_hash = EXCLUDED.code_hash,
                attempts_remaining = EXCLUDED.attempts_remaining,
                expires_at = EXCLUDED.expires_at,
                last_attempt_at = EXCLUDED.last_attempt_at,
                last_sent_at = EXCLUDED.last_sent_at,
                delivery_log_id = EXCLUDED.delivery_log_id
            "#,
        )
        .bind(&record.phone)
        .bind(&record.code_hash)
        .bind(record.attempts_remaining)
        .bind(record.expires_at)
        .bind(record.last_attempt_at)
        .bind(record.last_sent_at)
        .bind(record.delivery_log_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, phone: &str) -> Result<Option<OtpRecord>> {
        let record = sqlx::query_as::<_, OtpRecord>(
            r#"
            SELECT phone, code_hash, attempts_remaining, expires_at,
                   last_attempt_at, last_sent_at, delivery_log_id
            FROM otp_codes
            WHERE phone = $1
            "#,
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn delete(&self, phone: &str) -> Result<()> {
        sqlx::query("DELETE FROM otp_codes WHERE phone = $1")
            .bind(phone)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_if_hash(&self, phone: &str, code_hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM otp_codes WHERE phone = $1 AND code_hash = $2")
            .bind(phone)
            .bind(code_hash)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn consume(&self, phone: &str, code_hash: &str, now: DateTime<Utc>) -> Result<bool> {
        let deleted = sqlx::query_scalar::<_, String>(
            r#"
            DELETE FROM otp_codes
            WHERE phone = $1
              AND code_hash = $2
              AND expires_at > $3
              AND attempts_remaining > 0
            RETURNING phone
            "#,
        )
        .bind(phone)
        .bind(code_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(deleted.is_some())
    }

    async fn record_failed_attempt(
        &self,
        phone: &str,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>> {
        let remaining = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE otp_codes
            SET attempts_remaining = attempts_remaining - 1,
                last_attempt_at = $3
            WHERE phone = $1
              AND code_hash = $2
              AND attempts_remaining > 0
            RETURNING attempts_remaining
            "#,
        )
        .bind(phone)
        .bind(code_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(remaining)
    }

    async fn link_delivery_log(&self, phone: &str, code_hash: &str, log_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE otp_codes
            SET delivery_log_id = $3
            WHERE phone = $1 AND code_hash = $2
            "#,
        )
        .bind(phone)
        .bind(code_hash)
        .bind(log_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
