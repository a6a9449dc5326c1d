use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Purpose tag for login codes; quotas count rows with this purpose
pub const PURPOSE_OTP: &str = "otp";

/// Delivery status matching database sms_delivery_status
///
/// A row leaves `Pending` exactly once and never returns to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "sms_delivery_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Skipped => "skipped",
        }
    }

    /// Counts toward the resend cooldown
    pub fn is_active(&self) -> bool {
        matches!(self, DeliveryStatus::Pending | DeliveryStatus::Sent)
    }
}

/// Structured context stored alongside a delivery attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_expires_at: Option<DateTime<Utc>>,
}

/// Append-only audit row for one outbound SMS
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SmsDeliveryLog {
    pub id: Uuid,
    pub phone: String,
    pub ip_address: Option<String>,
    pub purpose: String,
    pub provider: String,
    pub status: DeliveryStatus,
    /// Message text with the code masked
    pub message: String,
    /// SHA-256 of the text actually sent
    pub message_hash: String,
    pub provider_message_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Json<DeliveryMetadata>,
    pub requested_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Fields supplied when a delivery attempt starts
#[derive(Debug, Clone)]
pub struct NewDeliveryLog {
    pub phone: String,
    pub ip_address: Option<String>,
    pub purpose: String,
    pub provider: String,
    pub message: String,
    pub message_hash: String,
    pub metadata: DeliveryMetadata,
    pub requested_at: DateTime<Utc>,
}

impl NewDeliveryLog {
    /// Materialize as a pending row
    pub fn into_pending(self, id: Uuid) -> SmsDeliveryLog {
        SmsDeliveryLog {
            id,
            phone: self.phone,
            ip_address: self.ip_address,
            purpose: self.purpose,
            provider: self.provider,
            status: DeliveryStatus::Pending,
            message: self.message,
            message_hash: self.message_hash,
            provider_message_id: None,
            error_code: None,
            error_message: None,
            metadata: Json(self.metadata),
            requested_at: self.requested_at,
            sent_at: None,
        }
    }
}
