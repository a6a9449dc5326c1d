/// Wiring of stores, services and settings into a ready [`PhoneAuthService`]
use crate::clock::Clock;
use crate::config::Settings;
use crate::db::{
    DeliveryLogStore, MemoryDeliveryLogStore, MemoryOtpStore, MemoryRefreshTokenStore,
    MemoryUserStore, OtpStore, PgDeliveryLogStore, PgOtpStore, PgRefreshTokenStore, PgUserStore,
    RefreshTokenStore, UserStore,
};
use crate::security::{MemoryRateLimiter, RateLimiter, RedisRateLimiter};
use crate::services::captcha::{CaptchaService, CaptchaStore, MemoryCaptchaStore, RedisCaptchaStore};
use crate::services::sms::{GatewayState, SmsDispatcher};
use crate::services::{AuthMetrics, OtpPolicy, PhoneAuthService, TokenIssuer};
use anyhow::{Context, Result};
use redis_utils::SharedConnectionManager;
use sqlx::PgPool;
use std::sync::Arc;

/// Storage backends behind every trait the services depend on
#[derive(Clone)]
pub struct Backends {
    pub otp_codes: Arc<dyn OtpStore>,
    pub delivery_logs: Arc<dyn DeliveryLogStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub users: Arc<dyn UserStore>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub captcha: Arc<dyn CaptchaStore>,
}

impl Backends {
    pub fn persistent(pool: PgPool, redis: SharedConnectionManager) -> Self {
        Self {
            otp_codes: Arc::new(PgOtpStore::new(pool.clone())),
            delivery_logs: Arc::new(PgDeliveryLogStore::new(pool.clone())),
            refresh_tokens: Arc::new(PgRefreshTokenStore::new(pool.clone())),
            users: Arc::new(PgUserStore::new(pool)),
            rate_limiter: Arc::new(RedisRateLimiter::new(redis.clone())),
            captcha: Arc::new(RedisCaptchaStore::new(redis)),
        }
    }

    /// Process-local state; development and tests only
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            otp_codes: Arc::new(MemoryOtpStore::new()),
            delivery_logs: Arc::new(MemoryDeliveryLogStore::new()),
            refresh_tokens: Arc::new(MemoryRefreshTokenStore::new()),
            users: Arc::new(MemoryUserStore::new()),
            rate_limiter: Arc::new(MemoryRateLimiter::new(clock.clone())),
            captcha: Arc::new(MemoryCaptchaStore::new(clock)),
        }
    }
}

pub fn build_service(
    settings: &Settings,
    backends: Backends,
    gateway: GatewayState,
    clock: Arc<dyn Clock>,
    metrics: AuthMetrics,
) -> Result<PhoneAuthService> {
    let codec = settings
        .jwt
        .codec()
        .context("Failed to initialize JWT codec")?;

    let policy = OtpPolicy::new(
        backends.otp_codes.clone(),
        backends.delivery_logs.clone(),
        backends.rate_limiter.clone(),
        clock.clone(),
        settings.otp.clone(),
    );

    let dispatcher = SmsDispatcher::new(
        gateway,
        backends.delivery_logs.clone(),
        clock.clone(),
        settings.app.environment.is_production(),
        metrics.clone(),
    );

    let captcha = CaptchaService::new(backends.captcha.clone(), settings.captcha.clone());

    let tokens = TokenIssuer::new(
        codec,
        backends.refresh_tokens.clone(),
        backends.users.clone(),
        clock.clone(),
        settings.refresh_token.ttl_days,
        metrics.clone(),
    );

    Ok(PhoneAuthService::new(
        Arc::new(policy),
        Arc::new(dispatcher),
        Arc::new(captcha),
        Arc::new(tokens),
        backends.users,
        clock,
        metrics,
    ))
}
