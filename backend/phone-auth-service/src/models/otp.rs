use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Outstanding one-time code for a phone number
///
/// At most one record exists per phone; issuing a new code replaces it.
/// Only the keyed hash of the code is ever stored.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OtpRecord {
    pub phone: String,
    #[serde(skip_serializing)]
    pub code_hash: String,
    pub attempts_remaining: i32,
    pub expires_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_sent_at: DateTime<Utc>,
    pub delivery_log_id: Option<Uuid>,
}

impl OtpRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts_remaining <= 0
    }

    /// Still able to satisfy a verification at `now`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && !self.is_exhausted()
    }
}
