/// Business logic for phone authentication
pub mod captcha;
pub mod metrics;
pub mod otp_policy;
pub mod phone_auth;
pub mod sms;
pub mod token_issuer;

pub use captcha::{CaptchaChallenge, CaptchaService, MemoryCaptchaStore, RedisCaptchaStore};
pub use metrics::AuthMetrics;
pub use otp_policy::{OtpPolicy, VerifyOutcome};
pub use phone_auth::{CaptchaAnswer, PhoneAuthService, SendCodeResult};
pub use token_issuer::{TokenIssuer, TokenPair};
