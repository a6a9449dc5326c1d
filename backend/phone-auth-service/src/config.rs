//! Configuration management for the phone auth service
//!
//! Loads settings from:
//! 1. Environment variables
//! 2. .env file (local development)
//!
//! Each concern gets its own typed section; components receive only the
//! section they need instead of reading a shared settings record.
//!
//! # Example
//!
//! ```no_run
//! use phone_auth_service::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("OTP TTL: {}s", settings.otp.ttl_secs);
//!     Ok(())
//! }
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use tracing::{info, warn};

const DEV_OTP_HASH_KEY: &str = "dev-only-otp-hash-key";

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub app: AppSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub server: ServerSettings,
    pub jwt: JwtSettings,
    pub refresh_token: RefreshTokenSettings,
    pub otp: OtpSettings,
    pub sms: SmsSettings,
    pub captcha: CaptchaSettings,
}

impl Settings {
    /// Load settings from environment variables (.env honoured in debug builds)
    pub fn load() -> Result<Self> {
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
            info!("Loaded .env file for development");
        }

        let settings = Settings {
            app: AppSettings::from_env()?,
            database: DatabaseSettings::from_env()?,
            redis: RedisSettings::from_env(),
            server: ServerSettings::from_env()?,
            jwt: JwtSettings::from_env()?,
            refresh_token: RefreshTokenSettings::from_env()?,
            otp: OtpSettings::from_env()?,
            sms: SmsSettings::from_env()?,
            captcha: CaptchaSettings::from_env()?,
        };
        settings.validate()?;

        Ok(settings)
    }

    /// Reject configurations that are only acceptable outside production
    pub fn validate(&self) -> Result<()> {
        if !self.app.environment.is_production() {
            if self.database.url.is_none() {
                warn!("DATABASE_URL not set; using in-memory stores (development only)");
            }
            if self.redis.url.is_none() {
                warn!("REDIS_URL not set; using in-memory counters (development only)");
            }
            return Ok(());
        }

        if self.database.url.is_none() {
            bail!("DATABASE_URL must be set in production");
        }
        if self.redis.url.is_none() {
            bail!("REDIS_URL must be set in production");
        }
        if self.otp.hash_key == DEV_OTP_HASH_KEY {
            bail!("OTP_HASH_KEY must be set in production");
        }
        if !self.captcha.enabled {
            bail!("CAPTCHA_ENABLED cannot be disabled in production");
        }
        Ok(())
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppEnvironment {
    Development,
    Testing,
    Staging,
    Production,
}

impl AppEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, AppEnvironment::Production)
    }
}

impl FromStr for AppEnvironment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(AppEnvironment::Development),
            "testing" | "test" => Ok(AppEnvironment::Testing),
            "staging" => Ok(AppEnvironment::Staging),
            "production" | "prod" => Ok(AppEnvironment::Production),
            other => bail!("Unknown APP_ENV: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub name: String,
    pub environment: AppEnvironment,
}

impl AppSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            name: env::var("APP_NAME").unwrap_or_else(|_| "Liftrace".to_string()),
            environment: env::var("APP_ENV")
                .unwrap_or_else(|_| "development".to_string())
                .parse()?,
        })
    }
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Absent outside production means in-memory stores
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: u64,
}

impl DatabaseSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: non_empty_var("DATABASE_URL"),
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 20)?,
            acquire_timeout: parse_var("DATABASE_ACQUIRE_TIMEOUT", 5)?,
        })
    }
}

/// Redis settings (rate-limit counters, captcha challenges)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    pub url: Option<String>,
}

impl RedisSettings {
    fn from_env() -> Self {
        Self {
            url: non_empty_var("REDIS_URL"),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Honour X-Forwarded-For / X-Real-IP (only behind a trusted proxy)
    pub trust_proxy_headers: bool,
    pub request_timeout_secs: u64,
}

impl ServerSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("SERVER_PORT", 8080)?,
            trust_proxy_headers: parse_var("TRUST_PROXY_HEADERS", false)?,
            request_timeout_secs: parse_var("REQUEST_TIMEOUT_SECS", 30)?,
        })
    }
}

/// JWT access-token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    pub signing_key: String,
    pub validation_key: Option<String>,
    pub algorithm: String,
    pub issuer: String,
    pub access_ttl_secs: i64,
}

impl JwtSettings {
    /// Prefer PEM-based RSA keys; fall back to a shared secret (development only)
    fn from_env() -> Result<Self> {
        let issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "liftrace-auth".to_string());
        let access_ttl_secs = parse_var("JWT_ACCESS_TTL_SECONDS", 900)?;

        if let Some(private_pem) = non_empty_var("JWT_PRIVATE_KEY") {
            return Ok(Self {
                signing_key: private_pem,
                validation_key: non_empty_var("JWT_PUBLIC_KEY"),
                algorithm: "RS256".to_string(),
                issuer,
                access_ttl_secs,
            });
        }

        let signing_key = env::var("JWT_SECRET")
            .context("JWT_SECRET must be set when no PEM keys are configured")?;

        Ok(Self {
            signing_key,
            validation_key: None,
            algorithm: "HS256".to_string(),
            issuer,
            access_ttl_secs,
        })
    }

    /// Build the token codec described by these settings
    pub fn codec(&self) -> Result<crypto_core::JwtCodec> {
        match self.algorithm.as_str() {
            "RS256" => {
                let public = self
                    .validation_key
                    .as_deref()
                    .context("JWT_PUBLIC_KEY must be set alongside JWT_PRIVATE_KEY")?;
                crypto_core::JwtCodec::rs256(
                    &self.signing_key,
                    public,
                    &self.issuer,
                    self.access_ttl_secs,
                )
            }
            "HS256" => Ok(crypto_core::JwtCodec::hs256(
                self.signing_key.as_bytes(),
                &self.issuer,
                self.access_ttl_secs,
            )),
            other => bail!("Unsupported JWT algorithm: {}", other),
        }
    }
}

/// Refresh token lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenSettings {
    pub ttl_days: i64,
}

impl Default for RefreshTokenSettings {
    fn default() -> Self {
        Self { ttl_days: 30 }
    }
}

impl RefreshTokenSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            ttl_days: parse_var("REFRESH_TOKEN_TTL_DAYS", 30)?,
        })
    }
}

/// OTP issuance policy
///
/// Every ceiling is optional; `None` disables that check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpSettings {
    pub code_length: usize,
    pub ttl_secs: i64,
    pub max_attempts: i32,
    pub burst_max_attempts: Option<u64>,
    pub burst_decay_secs: u64,
    pub cooldown_secs: Option<i64>,
    pub per_phone_hour: Option<i64>,
    pub per_phone_day: Option<i64>,
    pub per_ip_hour: Option<i64>,
    pub per_ip_day: Option<i64>,
    /// Server-side HMAC key for code hashes
    pub hash_key: String,
}

impl Default for OtpSettings {
    fn default() -> Self {
        Self {
            code_length: 6,
            ttl_secs: 120,
            max_attempts: 5,
            burst_max_attempts: Some(5),
            burst_decay_secs: 60,
            cooldown_secs: Some(60),
            per_phone_hour: Some(5),
            per_phone_day: Some(10),
            per_ip_hour: Some(20),
            per_ip_day: Some(50),
            hash_key: DEV_OTP_HASH_KEY.to_string(),
        }
    }
}

impl OtpSettings {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let code_length = parse_var("OTP_CODE_LENGTH", defaults.code_length)?;
        if !(4..=10).contains(&code_length) {
            bail!("OTP_CODE_LENGTH must be between 4 and 10");
        }

        Ok(Self {
            code_length,
            ttl_secs: parse_var("OTP_TTL_SECONDS", defaults.ttl_secs)?,
            max_attempts: parse_var("OTP_MAX_ATTEMPTS", defaults.max_attempts)?,
            burst_max_attempts: optional_var("OTP_BURST_MAX_ATTEMPTS", defaults.burst_max_attempts)?,
            burst_decay_secs: parse_var("OTP_BURST_DECAY_SECONDS", defaults.burst_decay_secs)?,
            cooldown_secs: optional_var("OTP_COOLDOWN_SECONDS", defaults.cooldown_secs)?,
            per_phone_hour: optional_var("OTP_PER_PHONE_HOUR", defaults.per_phone_hour)?,
            per_phone_day: optional_var("OTP_PER_PHONE_DAY", defaults.per_phone_day)?,
            per_ip_hour: optional_var("OTP_PER_IP_HOUR", defaults.per_ip_hour)?,
            per_ip_day: optional_var("OTP_PER_IP_DAY", defaults.per_ip_day)?,
            hash_key: non_empty_var("OTP_HASH_KEY").unwrap_or(defaults.hash_key),
        })
    }

    /// All throttling disabled; only TTL and attempt budget apply
    pub fn unthrottled() -> Self {
        Self {
            burst_max_attempts: None,
            cooldown_secs: None,
            per_phone_hour: None,
            per_phone_day: None,
            per_ip_hour: None,
            per_ip_day: None,
            ..Self::default()
        }
    }
}

/// Which SMS provider delivers messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsProviderKind {
    Twilio,
    Panel,
    Sns,
}

impl SmsProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmsProviderKind::Twilio => "twilio",
            SmsProviderKind::Panel => "panel",
            SmsProviderKind::Sns => "sns",
        }
    }
}

impl FromStr for SmsProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twilio" => Ok(SmsProviderKind::Twilio),
            "panel" => Ok(SmsProviderKind::Panel),
            "sns" => Ok(SmsProviderKind::Sns),
            other => bail!("Unknown SMS_PROVIDER: {}", other),
        }
    }
}

/// SMS delivery configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmsSettings {
    /// `None` means no provider selected
    pub provider: Option<SmsProviderKind>,
    pub request_timeout_secs: u64,
    pub twilio: TwilioSettings,
    pub panel: PanelSettings,
    pub sns: SnsSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwilioSettings {
    pub base_url: String,
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PanelSettings {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnsSettings {
    pub region: Option<String>,
    pub sender_id: Option<String>,
}

impl SmsSettings {
    fn from_env() -> Result<Self> {
        let provider = match non_empty_var("SMS_PROVIDER") {
            Some(raw) => Some(raw.parse()?),
            None => None,
        };

        Ok(Self {
            provider,
            request_timeout_secs: parse_var("SMS_REQUEST_TIMEOUT_SECS", 10)?,
            twilio: TwilioSettings {
                base_url: env::var("TWILIO_BASE_URL")
                    .unwrap_or_else(|_| "https://api.twilio.com".to_string()),
                account_sid: non_empty_var("TWILIO_ACCOUNT_SID"),
                auth_token: non_empty_var("TWILIO_AUTH_TOKEN"),
                from: non_empty_var("TWILIO_FROM"),
            },
            panel: PanelSettings {
                base_url: non_empty_var("SMS_PANEL_BASE_URL"),
                username: non_empty_var("SMS_PANEL_USERNAME"),
                password: non_empty_var("SMS_PANEL_PASSWORD"),
                from: non_empty_var("SMS_PANEL_FROM"),
            },
            sns: SnsSettings {
                region: non_empty_var("AWS_REGION"),
                sender_id: non_empty_var("SNS_SENDER_ID"),
            },
        })
    }
}

/// Captcha challenge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaSettings {
    pub enabled: bool,
    pub length: usize,
    pub ttl_secs: u64,
    /// HMAC key for stored answers
    pub hash_key: String,
}

impl Default for CaptchaSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            length: 5,
            ttl_secs: 120,
            hash_key: DEV_OTP_HASH_KEY.to_string(),
        }
    }
}

impl CaptchaSettings {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            enabled: parse_var("CAPTCHA_ENABLED", defaults.enabled)?,
            length: parse_var("CAPTCHA_LENGTH", defaults.length)?,
            ttl_secs: parse_var("CAPTCHA_TTL_SECONDS", defaults.ttl_secs)?,
            hash_key: non_empty_var("OTP_HASH_KEY").unwrap_or(defaults.hash_key),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match non_empty_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e)),
        None => Ok(default),
    }
}

/// Optional numeric setting; "off", "none" or "0" disable it
fn optional_var<T>(name: &str, default: Option<T>) -> Result<Option<T>>
where
    T: FromStr + PartialEq + Default,
    T::Err: Display,
{
    let Some(raw) = non_empty_var(name) else {
        return Ok(default);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "off" | "none" | "disabled" => Ok(None),
        value => {
            let parsed: T = value
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e))?;
            if parsed == T::default() {
                Ok(None)
            } else {
                Ok(Some(parsed))
            }
        }
    }
}
