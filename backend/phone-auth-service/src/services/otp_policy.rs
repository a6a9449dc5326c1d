/// OTP issuance and verification rules
///
/// Decides whether a code may be sent (burst limit, resend cooldown, rolling
/// quotas), mints codes, and verifies them against their attempt budget.
/// Every outward verification failure collapses to `false`; the detailed
/// [`VerifyOutcome`] exists for logs and metrics only.
use crate::clock::Clock;
use crate::config::OtpSettings;
use crate::db::{DeliveryLogStore, OtpStore};
use crate::error::{AuthError, Result};
use crate::i18n::QuotaScope;
use crate::models::delivery_log::PURPOSE_OTP;
use crate::models::OtpRecord;
use crate::security::{OtpHasher, RateLimiter};
use crate::validators::{is_code_shape, mask_phone};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const HOUR_SECS: i64 = 3600;
const DAY_SECS: i64 = 86_400;

/// Why a verification succeeded or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    NotFound,
    Expired,
    Exhausted,
    Mismatch { remaining: i32 },
}

impl VerifyOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerifyOutcome::Verified)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyOutcome::Verified => "verified",
            VerifyOutcome::NotFound => "not_found",
            VerifyOutcome::Expired => "expired",
            VerifyOutcome::Exhausted => "exhausted",
            VerifyOutcome::Mismatch { .. } => "mismatch",
        }
    }
}

pub struct OtpPolicy {
    otp_store: Arc<dyn OtpStore>,
    delivery_logs: Arc<dyn DeliveryLogStore>,
    limiter: Arc<dyn RateLimiter>,
    clock: Arc<dyn Clock>,
    hasher: OtpHasher,
    settings: OtpSettings,
}

impl OtpPolicy {
    pub fn new(
        otp_store: Arc<dyn OtpStore>,
        delivery_logs: Arc<dyn DeliveryLogStore>,
        limiter: Arc<dyn RateLimiter>,
        clock: Arc<dyn Clock>,
        settings: OtpSettings,
    ) -> Self {
        let hasher = OtpHasher::new(&settings.hash_key);
        Self {
            otp_store,
            delivery_logs,
            limiter,
            clock,
            hasher,
            settings,
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.settings.ttl_secs
    }

    /// Gate a send request; the first failing check wins
    ///
    /// Order: burst limit, resend cooldown, per-phone hour/day, per-IP hour/day.
    /// The burst hit is recorded whether or not the request is allowed.
    pub async fn ensure_can_send(&self, phone: &str, ip: Option<&str>) -> Result<()> {
        self.check_burst(phone, ip).await?;
        self.check_cooldown(phone).await?;

        let now = self.clock.now();
        let hour_ago = now - Duration::seconds(HOUR_SECS);
        let day_ago = now - Duration::seconds(DAY_SECS);

        if let Some(limit) = self.settings.per_phone_hour {
            let sent = self
                .delivery_logs
                .count_for_phone_since(phone, PURPOSE_OTP, hour_ago)
                .await?;
            self.check_quota(phone, sent, limit, QuotaScope::PhoneHour)?;
        }
        if let Some(limit) = self.settings.per_phone_day {
            let sent = self
                .delivery_logs
                .count_for_phone_since(phone, PURPOSE_OTP, day_ago)
                .await?;
            self.check_quota(phone, sent, limit, QuotaScope::PhoneDay)?;
        }

        let Some(ip) = ip else {
            return Ok(());
        };
        if let Some(limit) = self.settings.per_ip_hour {
            let sent = self
                .delivery_logs
                .count_for_ip_since(ip, PURPOSE_OTP, hour_ago)
                .await?;
            self.check_quota(phone, sent, limit, QuotaScope::IpHour)?;
        }
        if let Some(limit) = self.settings.per_ip_day {
            let sent = self
                .delivery_logs
                .count_for_ip_since(ip, PURPOSE_OTP, day_ago)
                .await?;
            self.check_quota(phone, sent, limit, QuotaScope::IpDay)?;
        }

        Ok(())
    }

    async fn check_burst(&self, phone: &str, ip: Option<&str>) -> Result<()> {
        let Some(max_attempts) = self.settings.burst_max_attempts else {
            return Ok(());
        };

        let key = burst_key(phone, ip);
        let limited = self.limiter.too_many_attempts(&key, max_attempts).await?;
        self.limiter.hit(&key, self.settings.burst_decay_secs).await?;

        if limited {
            let retry_after = self.limiter.available_in(&key).await?.max(1);
            warn!(
                phone = %mask_phone(phone),
                retry_after,
                "OTP send burst limit exceeded"
            );
            return Err(AuthError::RateLimitExceeded { retry_after });
        }
        Ok(())
    }

    async fn check_cooldown(&self, phone: &str) -> Result<()> {
        let Some(cooldown) = self.settings.cooldown_secs else {
            return Ok(());
        };
        let Some(last) = self
            .delivery_logs
            .latest_active_for_phone(phone, PURPOSE_OTP)
            .await?
        else {
            return Ok(());
        };

        let elapsed = (self.clock.now() - last).num_seconds();
        if elapsed < cooldown {
            let retry_after = (cooldown - elapsed).max(1) as u64;
            debug!(phone = %mask_phone(phone), retry_after, "OTP resend cooldown active");
            return Err(AuthError::CooldownActive { retry_after });
        }
        Ok(())
    }

    fn check_quota(&self, phone: &str, sent: i64, limit: i64, scope: QuotaScope) -> Result<()> {
        if sent >= limit {
            warn!(phone = %mask_phone(phone), %scope, sent, limit, "OTP quota exceeded");
            return Err(AuthError::QuotaExceeded { scope });
        }
        Ok(())
    }

    /// Mint a fresh code for `phone`, replacing any outstanding one
    ///
    /// Returns the plaintext code; only its keyed hash is stored.
    pub async fn generate(&self, phone: &str) -> Result<String> {
        let code = crypto_core::token::random_digits(self.settings.code_length);
        let now = self.clock.now();

        let record = OtpRecord {
            phone: phone.to_string(),
            code_hash: self.hasher.hash(phone, &code),
            attempts_remaining: self.settings.max_attempts,
            expires_at: now + Duration::seconds(self.settings.ttl_secs),
            last_attempt_at: None,
            last_sent_at: now,
            delivery_log_id: None,
        };
        self.otp_store.upsert(&record).await?;

        info!(phone = %mask_phone(phone), expires_at = %record.expires_at, "OTP generated");
        Ok(code)
    }

    /// `true` exactly once for the current code, before expiry and exhaustion
    pub async fn verify(&self, phone: &str, code: &str) -> Result<bool> {
        Ok(self.verify_detailed(phone, code).await?.is_verified())
    }

    pub async fn verify_detailed(&self, phone: &str, code: &str) -> Result<VerifyOutcome> {
        let now = self.clock.now();
        let Some(record) = self.otp_store.find(phone).await? else {
            return Ok(VerifyOutcome::NotFound);
        };

        // Deletes are conditional on the hash read above so a code issued
        // concurrently by a resend is never removed here.
        if record.is_expired(now) {
            self.otp_store.delete_if_hash(phone, &record.code_hash).await?;
            return Ok(VerifyOutcome::Expired);
        }
        if record.is_exhausted() {
            self.otp_store.delete_if_hash(phone, &record.code_hash).await?;
            return Ok(VerifyOutcome::Exhausted);
        }

        let matches = is_code_shape(code, self.settings.code_length)
            && self.hasher.verify(phone, code, &record.code_hash);

        if matches {
            if self.otp_store.consume(phone, &record.code_hash, now).await? {
                info!(phone = %mask_phone(phone), "OTP verified");
                return Ok(VerifyOutcome::Verified);
            }
            // Lost a race with a concurrent verify or a replacement code
            return Ok(VerifyOutcome::NotFound);
        }

        let Some(remaining) = self
            .otp_store
            .record_failed_attempt(phone, &record.code_hash, now)
            .await?
        else {
            debug!(phone = %mask_phone(phone), "OTP replaced or consumed during verification");
            return Ok(VerifyOutcome::NotFound);
        };
        if remaining == 0 {
            self.otp_store.delete_if_hash(phone, &record.code_hash).await?;
        }

        warn!(phone = %mask_phone(phone), remaining, "OTP mismatch");
        Ok(VerifyOutcome::Mismatch { remaining })
    }

    /// Remove any outstanding code for `phone`, whichever it is
    pub async fn clear(&self, phone: &str) -> Result<()> {
        self.otp_store.delete(phone).await
    }

    /// Drop `code` if it is still the outstanding one for `phone`
    pub async fn discard(&self, phone: &str, code: &str) -> Result<()> {
        let hash = self.hasher.hash(phone, code);
        self.otp_store.delete_if_hash(phone, &hash).await?;
        Ok(())
    }

    /// Link the outstanding code to the log row of the SMS that delivered it
    ///
    /// No-op when the code has since been replaced.
    pub async fn attach_delivery_log(&self, phone: &str, code: &str, log_id: Uuid) -> Result<()> {
        let hash = self.hasher.hash(phone, code);
        if !self.otp_store.link_delivery_log(phone, &hash, log_id).await? {
            debug!(phone = %mask_phone(phone), %log_id, "OTP replaced before delivery log link");
        }
        Ok(())
    }

    /// Expiry of the outstanding code, if any
    pub async fn expires_at(&self, phone: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.otp_store.find(phone).await?.map(|r| r.expires_at))
    }
}

fn burst_key(phone: &str, ip: Option<&str>) -> String {
    redis_utils::key("otp_send", &[phone, ip.unwrap_or("unknown")])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{MemoryDeliveryLogStore, MemoryOtpStore};
    use crate::models::{DeliveryMetadata, NewDeliveryLog};
    use crate::security::MemoryRateLimiter;

    const PHONE: &str = "+14155552671";

    struct Harness {
        policy: OtpPolicy,
        clock: ManualClock,
        otp_store: Arc<MemoryOtpStore>,
        logs: Arc<MemoryDeliveryLogStore>,
    }

    fn harness(settings: OtpSettings) -> Harness {
        let clock = ManualClock::new(Utc::now());
        let otp_store = Arc::new(MemoryOtpStore::new());
        let logs = Arc::new(MemoryDeliveryLogStore::new());
        let limiter = Arc::new(MemoryRateLimiter::new(Arc::new(clock.clone())));
        let policy = OtpPolicy::new(
            otp_store.clone(),
            logs.clone(),
            limiter,
            Arc::new(clock.clone()),
            settings,
        );
        Harness {
            policy,
            clock,
            otp_store,
            logs,
        }
    }

    async fn log_send(h: &Harness, ip: &str) {
        h.logs
            .insert(NewDeliveryLog {
                phone: PHONE.to_string(),
                ip_address: Some(ip.to_string()),
                purpose: PURPOSE_OTP.to_string(),
                provider: "twilio".to_string(),
                message: "code ******".to_string(),
                message_hash: "h".to_string(),
                metadata: DeliveryMetadata::default(),
                requested_at: h.clock.now(),
            })
            .await
            .unwrap();
    }

    fn wrong_code(code: &str) -> String {
        let first = if code.starts_with('0') { '1' } else { '0' };
        format!("{}{}", first, &code[1..])
    }

    #[tokio::test]
    async fn test_code_has_configured_width() {
        let h = harness(OtpSettings::unthrottled());
        let code = h.policy.generate(PHONE).await.unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.bytes().all(|b| b.is_ascii_digit()));

        let record = h.otp_store.find(PHONE).await.unwrap().unwrap();
        assert_ne!(record.code_hash, code);
        assert_eq!(record.attempts_remaining, 5);
    }

    #[tokio::test]
    async fn test_mismatch_decrements_then_deletes() {
        let settings = OtpSettings {
            max_attempts: 2,
            ..OtpSettings::unthrottled()
        };
        let h = harness(settings);
        let code = h.policy.generate(PHONE).await.unwrap();
        let wrong = wrong_code(&code);

        assert_eq!(
            h.policy.verify_detailed(PHONE, &wrong).await.unwrap(),
            VerifyOutcome::Mismatch { remaining: 1 }
        );
        assert_eq!(
            h.policy.verify_detailed(PHONE, &wrong).await.unwrap(),
            VerifyOutcome::Mismatch { remaining: 0 }
        );
        assert!(h.otp_store.find(PHONE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_code_burns_an_attempt() {
        let h = harness(OtpSettings::unthrottled());
        h.policy.generate(PHONE).await.unwrap();

        assert!(!h.policy.verify(PHONE, "12ab").await.unwrap());
        let record = h.otp_store.find(PHONE).await.unwrap().unwrap();
        assert_eq!(record.attempts_remaining, 4);
    }

    #[tokio::test]
    async fn test_burst_limit_trips_and_reports_wait() {
        let settings = OtpSettings {
            burst_max_attempts: Some(2),
            burst_decay_secs: 60,
            ..OtpSettings::unthrottled()
        };
        let h = harness(settings);

        h.policy.ensure_can_send(PHONE, Some("10.0.0.1")).await.unwrap();
        h.policy.ensure_can_send(PHONE, Some("10.0.0.1")).await.unwrap();
        let err = h
            .policy
            .ensure_can_send(PHONE, Some("10.0.0.1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RateLimitExceeded { retry_after: 60 }));

        // Separate key per client address
        h.policy.ensure_can_send(PHONE, Some("10.0.0.2")).await.unwrap();

        h.clock.advance_secs(60);
        h.policy.ensure_can_send(PHONE, Some("10.0.0.1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_blocked_retries_extend_burst_block() {
        let settings = OtpSettings {
            burst_max_attempts: Some(2),
            burst_decay_secs: 60,
            ..OtpSettings::unthrottled()
        };
        let h = harness(settings);
        let ip = Some("10.0.0.1");

        h.policy.ensure_can_send(PHONE, ip).await.unwrap();
        h.policy.ensure_can_send(PHONE, ip).await.unwrap();

        // Blocked attempts at t=11, 22, 33, 44, 55
        for _ in 0..5 {
            h.clock.advance_secs(11);
            assert!(h.policy.ensure_can_send(PHONE, ip).await.is_err());
        }

        h.clock.advance_secs(6);
        let err = h.policy.ensure_can_send(PHONE, ip).await.unwrap_err();
        assert!(matches!(err, AuthError::RateLimitExceeded { retry_after: 60 }));

        // A full quiet window lifts the block
        h.clock.advance_secs(60);
        h.policy.ensure_can_send(PHONE, ip).await.unwrap();
    }

    #[tokio::test]
    async fn test_cooldown_counts_from_latest_active_log() {
        let settings = OtpSettings {
            cooldown_secs: Some(60),
            ..OtpSettings::unthrottled()
        };
        let h = harness(settings);
        log_send(&h, "10.0.0.1").await;

        h.clock.advance_secs(20);
        let err = h.policy.ensure_can_send(PHONE, None).await.unwrap_err();
        assert!(matches!(err, AuthError::CooldownActive { retry_after: 40 }));

        h.clock.advance_secs(40);
        h.policy.ensure_can_send(PHONE, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_hold_cooldown() {
        let settings = OtpSettings {
            cooldown_secs: Some(60),
            ..OtpSettings::unthrottled()
        };
        let h = harness(settings);
        log_send(&h, "10.0.0.1").await;
        let log = h.logs.all().pop().unwrap();
        h.logs.mark_failed(log.id, Some("30003"), None).await.unwrap();

        h.policy.ensure_can_send(PHONE, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_ip_quota_applies_across_phones() {
        let settings = OtpSettings {
            per_ip_hour: Some(1),
            ..OtpSettings::unthrottled()
        };
        let h = harness(settings);
        log_send(&h, "10.0.0.1").await;

        let err = h
            .policy
            .ensure_can_send("+14155550000", Some("10.0.0.1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::QuotaExceeded {
                scope: QuotaScope::IpHour
            }
        ));
        h.policy
            .ensure_can_send("+14155550000", Some("10.0.0.9"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_attach_delivery_log_links_current_code() {
        let h = harness(OtpSettings::unthrottled());
        let code = h.policy.generate(PHONE).await.unwrap();
        let log_id = Uuid::new_v4();

        h.policy.attach_delivery_log(PHONE, &code, log_id).await.unwrap();
        let record = h.otp_store.find(PHONE).await.unwrap().unwrap();
        assert_eq!(record.delivery_log_id, Some(log_id));
    }

    /// Store that issues a replacement code right after each lookup, as a
    /// resend landing between the read and the decrement would
    struct ResendDuringLookup {
        inner: MemoryOtpStore,
    }

    #[async_trait::async_trait]
    impl OtpStore for ResendDuringLookup {
        async fn upsert(&self, record: &OtpRecord) -> Result<()> {
            self.inner.upsert(record).await
        }

        async fn find(&self, phone: &str) -> Result<Option<OtpRecord>> {
            let found = self.inner.find(phone).await?;
            if let Some(record) = &found {
                let replacement = OtpRecord {
                    code_hash: "replacement-hash".to_string(),
                    attempts_remaining: 5,
                    ..record.clone()
                };
                self.inner.upsert(&replacement).await?;
            }
            Ok(found)
        }

        async fn delete(&self, phone: &str) -> Result<()> {
            self.inner.delete(phone).await
        }

        async fn delete_if_hash(&self, phone: &str, code_hash: &str) -> Result<bool> {
            self.inner.delete_if_hash(phone, code_hash).await
        }

        async fn consume(&self, phone: &str, code_hash: &str, now: DateTime<Utc>) -> Result<bool> {
            self.inner.consume(phone, code_hash, now).await
        }

        async fn record_failed_attempt(
            &self,
            phone: &str,
            code_hash: &str,
            now: DateTime<Utc>,
        ) -> Result<Option<i32>> {
            self.inner.record_failed_attempt(phone, code_hash, now).await
        }

        async fn link_delivery_log(
            &self,
            phone: &str,
            code_hash: &str,
            log_id: Uuid,
        ) -> Result<bool> {
            self.inner.link_delivery_log(phone, code_hash, log_id).await
        }
    }

    #[tokio::test]
    async fn test_wrong_guess_leaves_replacement_code_alone() {
        let clock = ManualClock::new(Utc::now());
        let store = Arc::new(ResendDuringLookup {
            inner: MemoryOtpStore::new(),
        });
        let policy = OtpPolicy::new(
            store.clone(),
            Arc::new(MemoryDeliveryLogStore::new()),
            Arc::new(MemoryRateLimiter::new(Arc::new(clock.clone()))),
            Arc::new(clock.clone()),
            OtpSettings::unthrottled(),
        );
        let code = policy.generate(PHONE).await.unwrap();

        let outcome = policy
            .verify_detailed(PHONE, &wrong_code(&code))
            .await
            .unwrap();
        assert_eq!(outcome, VerifyOutcome::NotFound);

        let record = store.inner.find(PHONE).await.unwrap().unwrap();
        assert_eq!(record.code_hash, "replacement-hash");
        assert_eq!(record.attempts_remaining, 5);
    }

    #[tokio::test]
    async fn test_clear_removes_outstanding_code() {
        let h = harness(OtpSettings::unthrottled());
        let code = h.policy.generate(PHONE).await.unwrap();

        h.policy.clear(PHONE).await.unwrap();
        assert!(h.otp_store.find(PHONE).await.unwrap().is_none());
        assert!(!h.policy.verify(PHONE, &code).await.unwrap());
    }

    #[tokio::test]
    async fn test_discard_ignores_newer_code() {
        let h = harness(OtpSettings::unthrottled());
        let first = h.policy.generate(PHONE).await.unwrap();
        let second = h.policy.generate(PHONE).await.unwrap();

        if first != second {
            h.policy.discard(PHONE, &first).await.unwrap();
            assert!(h.otp_store.find(PHONE).await.unwrap().is_some());
        }
        h.policy.discard(PHONE, &second).await.unwrap();
        assert!(h.otp_store.find(PHONE).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_correct_codes_verify_once() {
        let h = harness(OtpSettings::unthrottled());
        let code = h.policy.generate(PHONE).await.unwrap();
        let policy = Arc::new(h.policy);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..12 {
            let policy = policy.clone();
            let code = code.clone();
            tasks.spawn(async move { policy.verify(PHONE, &code).await.unwrap() });
        }

        let mut verified = 0;
        while let Some(ok) = tasks.join_next().await {
            if ok.unwrap() {
                verified += 1;
            }
        }
        assert_eq!(verified, 1);
        assert!(h.otp_store.find(PHONE).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_wrong_guesses_respect_attempt_budget() {
        let h = harness(OtpSettings::unthrottled());
        let code = h.policy.generate(PHONE).await.unwrap();
        let wrong = wrong_code(&code);
        let policy = Arc::new(h.policy);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..12 {
            let policy = policy.clone();
            let wrong = wrong.clone();
            tasks.spawn(async move { policy.verify_detailed(PHONE, &wrong).await.unwrap() });
        }

        let mut remaining = Vec::new();
        while let Some(outcome) = tasks.join_next().await {
            match outcome.unwrap() {
                VerifyOutcome::Mismatch { remaining: left } => remaining.push(left),
                VerifyOutcome::NotFound | VerifyOutcome::Exhausted => {}
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        remaining.sort();
        assert_eq!(remaining, vec![0, 1, 2, 3, 4]);
        assert!(h.otp_store.find(PHONE).await.unwrap().is_none());

        // The burned code stays unusable
        assert!(!policy.verify(PHONE, &code).await.unwrap());
    }
}
