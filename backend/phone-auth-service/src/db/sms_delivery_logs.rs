/// SMS delivery audit persistence
use crate::error::Result;
use crate::models::{NewDeliveryLog, SmsDeliveryLog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

/// Append-only log of outbound messages
///
/// The `mark_*` transitions only apply to rows still `pending` and report
/// whether a row changed.
#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    /// Record a new attempt in `pending` state
    async fn insert(&self, entry: NewDeliveryLog) -> Result<SmsDeliveryLog>;

    async fn mark_sent(
        &self,
        id: Uuid,
        provider_message_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn mark_failed(
        &self,
        id: Uuid,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<bool>;

    async fn mark_skipped(&self, id: Uuid, reason: &str) -> Result<bool>;

    /// Request time of the newest pending or sent row
    async fn latest_active_for_phone(
        &self,
        phone: &str,
        purpose: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Rows for the phone requested at or after `since`, any status
    async fn count_for_phone_since(
        &self,
        phone: &str,
        purpose: &str,
        since: DateTime<Utc>,
    ) -> Result<i64>;

    /// Rows for the IP requested at or after `since`, any status
    async fn count_for_ip_since(&self, ip: &str, purpose: &str, since: DateTime<Utc>)
        -> Result<i64>;

    async fn find(&self, id: Uuid) -> Result<Option<SmsDeliveryLog>>;
}

const LOG_COLUMNS: &str = r#"
    id, phone, ip_address, purpose, provider, status, message, message_hash,
    provider_message_id, error_code, error_message, metadata, requested_at, sent_at
"#;

#[derive(Clone)]
pub struct PgDeliveryLogStore {
    pool: PgPool,
}

impl PgDeliveryLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryLogStore for PgDeliveryLogStore {
    async fn insert(&self, entry: NewDeliveryLog) -> Result<SmsDeliveryLog> {
        let query = format!(
            r#"
            INSERT INTO sms_delivery_logs (
                id, phone, ip_address, purpose, provider, status,
                message, message_hash, metadata, requested_at
            )
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8, $9)
            RETURNING {}
            "#,
            LOG_COLUMNS
        );

        let log = sqlx::query_as::<_, SmsDeliveryLog>(&query)
            .bind(Uuid::new_v4())
            .bind(&entry.phone)
            .bind(&entry.ip_address)
            .bind(&entry.purpose)
            .bind(&entry.provider)
            .bind(&entry.message)
            .bind(&entry.message_hash)
            .bind(Json(&entry.metadata))
            .bind(entry.requested_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(log)
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        provider_message_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sms_delivery_logs
            SET status = 'sent', provider_message_id = $2, sent_at = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(provider_message_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sms_delivery_logs
            SET status = 'failed', error_code = $2, error_message = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(error_code)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_skipped(&self, id: Uuid, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sms_delivery_logs
            SET status = 'skipped', error_code = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn latest_active_for_phone(
        &self,
        phone: &str,
        purpose: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let latest = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"
            SELECT MAX(requested_at)
            FROM sms_delivery_logs
            WHERE phone = $1 AND purpose = $2 AND status IN ('pending', 'sent')
            "#,
        )
        .bind(phone)
        .bind(purpose)
        .fetch_one(&self.pool)
        .await?;

        Ok(latest)
    }

    async fn count_for_phone_since(
        &self,
        phone: &str,
        purpose: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM sms_delivery_logs
            WHERE phone = $1 AND purpose = $2 AND requested_at >= $3
            "#,
        )
        .bind(phone)
        .bind(purpose)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn count_for_ip_since(
        &self,
        ip: &str,
        purpose: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM sms_delivery_logs
            WHERE ip_address = $1 AND purpose = $2 AND requested_at >= $3
            "#,
        )
        .bind(ip)
        .bind(purpose)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn find(&self, id: Uuid) -> Result<Option<SmsDeliveryLog>> {
        let query = format!("SELECT {} FROM sms_delivery_logs WHERE id = $1", LOG_COLUMNS);

        let log = sqlx::query_as::<_, SmsDeliveryLog>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(log)
    }
}
