use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Phone-keyed account
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub phone: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(phone: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            phone: phone.to_string(),
            is_active: true,
            created_at: now,
            last_login_at: None,
        }
    }
}
