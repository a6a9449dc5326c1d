/// In-process stores for development and tests
///
/// Each conditional operation runs under the map's shard lock, which gives
/// the same single-winner guarantees as the conditional SQL statements.
use crate::db::{DeliveryLogStore, OtpStore, RefreshTokenStore, UserStore};
use crate::error::Result;
use crate::models::{
    DeliveryStatus, NewDeliveryLog, OtpRecord, RefreshToken, SmsDeliveryLog, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryOtpStore {
    records: DashMap<String, OtpRecord>,
}

impl MemoryOtpStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OtpStore for MemoryOtpStore {
    async fn upsert(&self, record: &OtpRecord) -> Result<()> {
        self.records.insert(record.phone.clone(), record.clone());
        Ok(())
    }

    async fn find(&self, phone: &str) -> Result<Option<OtpRecord>> {
        Ok(self.records.get(phone).map(|r| r.value().clone()))
    }

    async fn delete(&self, phone: &str) -> Result<()> {
        self.records.remove(phone);
        Ok(())
    }

    async fn delete_if_hash(&self, phone: &str, code_hash: &str) -> Result<bool> {
        let removed = self
            .records
            .remove_if(phone, |_, r| r.code_hash == code_hash);
        Ok(removed.is_some())
    }

    async fn consume(&self, phone: &str, code_hash: &str, now: DateTime<Utc>) -> Result<bool> {
        let removed = self
            .records
            .remove_if(phone, |_, r| r.code_hash == code_hash && r.is_live(now));
        Ok(removed.is_some())
    }

    async fn record_failed_attempt(
        &self,
        phone: &str,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>> {
        let Some(mut record) = self.records.get_mut(phone) else {
            return Ok(None);
        };
        if record.code_hash != code_hash || record.attempts_remaining <= 0 {
            return Ok(None);
        }

        record.attempts_remaining -= 1;
        record.last_attempt_at = Some(now);
        Ok(Some(record.attempts_remaining))
    }

    async fn link_delivery_log(&self, phone: &str, code_hash: &str, log_id: Uuid) -> Result<bool> {
        match self.records.get_mut(phone) {
            Some(mut record) if record.code_hash == code_hash => {
                record.delivery_log_id = Some(log_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryDeliveryLogStore {
    logs: DashMap<Uuid, SmsDeliveryLog>,
}

impl MemoryDeliveryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row, oldest first
    pub fn all(&self) -> Vec<SmsDeliveryLog> {
        let mut logs: Vec<SmsDeliveryLog> = self.logs.iter().map(|e| e.value().clone()).collect();
        logs.sort_by_key(|log| log.requested_at);
        logs
    }

    fn transition<F>(&self, id: Uuid, apply: F) -> bool
    where
        F: FnOnce(&mut SmsDeliveryLog),
    {
        match self.logs.get_mut(&id) {
            Some(mut log) if log.status == DeliveryStatus::Pending => {
                apply(log.value_mut());
                true
            }
            _ => false,
        }
    }

    fn count_where<F>(&self, matches: F) -> i64
    where
        F: Fn(&SmsDeliveryLog) -> bool,
    {
        self.logs.iter().filter(|e| matches(e.value())).count() as i64
    }
}

#[async_trait]
impl DeliveryLogStore for MemoryDeliveryLogStore {
    async fn insert(&self, entry: NewDeliveryLog) -> Result<SmsDeliveryLog> {
        let log = entry.into_pending(Uuid::new_v4());
        self.logs.insert(log.id, log.clone());
        Ok(log)
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        provider_message_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.transition(id, |log| {
            log.status = DeliveryStatus::Sent;
            log.provider_message_id = provider_message_id.map(str::to_string);
            log.sent_at = Some(at);
        }))
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<bool> {
        Ok(self.transition(id, |log| {
            log.status = DeliveryStatus::Failed;
            log.error_code = error_code.map(str::to_string);
            log.error_message = error_message.map(str::to_string);
        }))
    }

    async fn mark_skipped(&self, id: Uuid, reason: &str) -> Result<bool> {
        Ok(self.transition(id, |log| {
            log.status = DeliveryStatus::Skipped;
            log.error_code = Some(reason.to_string());
        }))
    }

    async fn latest_active_for_phone(
        &self,
        phone: &str,
        purpose: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .logs
            .iter()
            .filter(|e| e.phone == phone && e.purpose == purpose && e.status.is_active())
            .map(|e| e.requested_at)
            .max())
    }

    async fn count_for_phone_since(
        &self,
        phone: &str,
        purpose: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        Ok(self.count_where(|log| {
            log.phone == phone && log.purpose == purpose && log.requested_at >= since
        }))
    }

    async fn count_for_ip_since(
        &self,
        ip: &str,
        purpose: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        Ok(self.count_where(|log| {
            log.ip_address.as_deref() == Some(ip)
                && log.purpose == purpose
                && log.requested_at >= since
        }))
    }

    async fn find(&self, id: Uuid) -> Result<Option<SmsDeliveryLog>> {
        Ok(self.logs.get(&id).map(|e| e.value().clone()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryRefreshTokenStore {
    tokens: DashMap<String, RefreshToken>,
}

impl MemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn insert(&self, token: &RefreshToken) -> Result<()> {
        self.tokens.insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn take_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        Ok(self.tokens.remove(token_hash).map(|(_, token)| token))
    }

    async fn delete_by_hash(&self, user_id: Uuid, token_hash: &str) -> Result<bool> {
        let removed = self
            .tokens
            .remove_if(token_hash, |_, token| token.user_id == user_id);
        Ok(removed.is_some())
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64> {
        let before = self.tokens.len();
        self.tokens.retain(|_, token| token.user_id != user_id);
        Ok(before.saturating_sub(self.tokens.len()) as u64)
    }
}

/// Accounts keyed by phone
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: DashMap<String, User>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the active flag; used to exercise disabled-account paths
    pub fn set_active(&self, phone: &str, active: bool) -> bool {
        match self.users.get_mut(phone) {
            Some(mut user) => {
                user.is_active = active;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_or_create_by_phone(&self, phone: &str, now: DateTime<Utc>) -> Result<User> {
        let user = self
            .users
            .entry(phone.to_string())
            .or_insert_with(|| User::new(phone, now));
        Ok(user.value().clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self
            .users
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.value().clone()))
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut user) = self.users.iter_mut().find(|e| e.id == id) {
            user.last_login_at = Some(at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeliveryMetadata;
    use chrono::Duration;

    fn otp(phone: &str, hash: &str, now: DateTime<Utc>) -> OtpRecord {
        OtpRecord {
            phone: phone.to_string(),
            code_hash: hash.to_string(),
            attempts_remaining: 2,
            expires_at: now + Duration::seconds(120),
            last_attempt_at: None,
            last_sent_at: now,
            delivery_log_id: None,
        }
    }

    fn new_log(phone: &str, ip: &str, at: DateTime<Utc>) -> NewDeliveryLog {
        NewDeliveryLog {
            phone: phone.to_string(),
            ip_address: Some(ip.to_string()),
            purpose: "otp".to_string(),
            provider: "twilio".to_string(),
            message: "Your code is ******".to_string(),
            message_hash: "abc".to_string(),
            metadata: DeliveryMetadata::default(),
            requested_at: at,
        }
    }

    #[tokio::test]
    async fn test_consume_requires_matching_hash() {
        let store = MemoryOtpStore::new();
        let now = Utc::now();
        store.upsert(&otp("+14155552671", "new", now)).await.unwrap();

        assert!(!store.consume("+14155552671", "old", now).await.unwrap());
        assert!(store.consume("+14155552671", "new", now).await.unwrap());
        assert!(!store.consume("+14155552671", "new", now).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_attempts_floor_at_zero() {
        let store = MemoryOtpStore::new();
        let now = Utc::now();
        store.upsert(&otp("+14155552671", "h", now)).await.unwrap();

        assert_eq!(store.record_failed_attempt("+14155552671", "h", now).await.unwrap(), Some(1));
        assert_eq!(store.record_failed_attempt("+14155552671", "h", now).await.unwrap(), Some(0));
        assert_eq!(store.record_failed_attempt("+14155552671", "h", now).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_if_hash_keeps_replacement() {
        let store = MemoryOtpStore::new();
        let now = Utc::now();
        store.upsert(&otp("+14155552671", "new", now)).await.unwrap();

        assert!(!store.delete_if_hash("+14155552671", "old").await.unwrap());
        assert!(store.find("+14155552671").await.unwrap().is_some());
        assert!(store.delete_if_hash("+14155552671", "new").await.unwrap());
        assert!(store.find("+14155552671").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_has_one_winner() {
        let store = std::sync::Arc::new(MemoryOtpStore::new());
        let now = Utc::now();
        store.upsert(&otp("+14155552671", "h", now)).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let store = store.clone();
            tasks.spawn(async move { store.consume("+14155552671", "h", now).await.unwrap() });
        }

        let mut winners = 0;
        while let Some(won) = tasks.join_next().await {
            if won.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failed_attempts_never_go_negative() {
        let store = std::sync::Arc::new(MemoryOtpStore::new());
        let now = Utc::now();
        store.upsert(&otp("+14155552671", "h", now)).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let store = store.clone();
            tasks.spawn(async move {
                store
                    .record_failed_attempt("+14155552671", "h", now)
                    .await
                    .unwrap()
            });
        }

        let mut counted = Vec::new();
        while let Some(remaining) = tasks.join_next().await {
            if let Some(remaining) = remaining.unwrap() {
                counted.push(remaining);
            }
        }
        counted.sort();
        assert_eq!(counted, vec![0, 1]);

        let record = store.find("+14155552671").await.unwrap().unwrap();
        assert_eq!(record.attempts_remaining, 0);
    }

    #[tokio::test]
    async fn test_delivery_status_transitions_once() {
        let store = MemoryDeliveryLogStore::new();
        let now = Utc::now();
        let log = store.insert(new_log("+14155552671", "10.0.0.1", now)).await.unwrap();
        assert_eq!(log.status, DeliveryStatus::Pending);

        assert!(store.mark_sent(log.id, Some("SM1"), now).await.unwrap());
        assert!(!store.mark_failed(log.id, Some("x"), None).await.unwrap());

        let stored = store.find(log.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Sent);
        assert_eq!(stored.provider_message_id.as_deref(), Some("SM1"));
    }

    #[tokio::test]
    async fn test_counts_and_latest_active() {
        let store = MemoryDeliveryLogStore::new();
        let now = Utc::now();
        let first = store.insert(new_log("+14155552671", "10.0.0.1", now)).await.unwrap();
        let later = now + Duration::seconds(30);
        let second = store.insert(new_log("+14155552671", "10.0.0.2", later)).await.unwrap();
        store.mark_failed(second.id, None, None).await.unwrap();

        assert_eq!(
            store.latest_active_for_phone("+14155552671", "otp").await.unwrap(),
            Some(first.requested_at)
        );
        assert_eq!(
            store.count_for_phone_since("+14155552671", "otp", now).await.unwrap(),
            2
        );
        assert_eq!(
            store.count_for_ip_since("10.0.0.2", "otp", now).await.unwrap(),
            1
        );
        assert_eq!(
            store.count_for_phone_since("+14155552671", "otp", later + Duration::seconds(1)).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_refresh_token_take_is_single_use() {
        let store = MemoryRefreshTokenStore::new();
        let now = Utc::now();
        let token = RefreshToken {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: "hash".to_string(),
            expires_at: now + Duration::days(30),
            last_used_at: now,
            ip_address: None,
            user_agent: None,
            created_at: now,
        };
        store.insert(&token).await.unwrap();

        assert!(store.take_by_hash("hash").await.unwrap().is_some());
        assert!(store.take_by_hash("hash").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let store = MemoryUserStore::new();
        let now = Utc::now();
        let first = store.find_or_create_by_phone("+14155552671", now).await.unwrap();
        let second = store.find_or_create_by_phone("+14155552671", now).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(store.find_by_id(first.id).await.unwrap().is_some());
    }
}
