/// Phone number login flow
///
/// Flow:
/// 1. Client fetches a captcha challenge
/// 2. Client requests a code with the captcha answer
/// 3. Code is generated, delivered by SMS and linked to its delivery log
/// 4. Client submits the code and receives an access/refresh token pair
use crate::clock::Clock;
use crate::db::UserStore;
use crate::error::{AuthError, Result};
use crate::i18n::{Locale, Text};
use crate::models::delivery_log::PURPOSE_OTP;
use crate::models::{ClientInfo, DeliveryMetadata, DeliveryStatus};
use crate::services::captcha::CaptchaService;
use crate::services::metrics::AuthMetrics;
use crate::services::otp_policy::OtpPolicy;
use crate::services::sms::{SmsDispatcher, SmsRequest};
use crate::services::token_issuer::{TokenIssuer, TokenPair};
use crate::validators::mask_phone;
use chrono::Duration;
use crypto_core::Claims;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Captcha id and the user's answer
#[derive(Debug, Clone)]
pub struct CaptchaAnswer {
    pub id: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct SendCodeResult {
    /// Seconds until the code expires
    pub expires_in: i64,
    pub delivery_log_id: Uuid,
    pub delivery_status: DeliveryStatus,
}

pub struct PhoneAuthService {
    policy: Arc<OtpPolicy>,
    dispatcher: Arc<SmsDispatcher>,
    captcha: Arc<CaptchaService>,
    tokens: Arc<TokenIssuer>,
    users: Arc<dyn UserStore>,
    clock: Arc<dyn Clock>,
    metrics: AuthMetrics,
}

impl PhoneAuthService {
    pub fn new(
        policy: Arc<OtpPolicy>,
        dispatcher: Arc<SmsDispatcher>,
        captcha: Arc<CaptchaService>,
        tokens: Arc<TokenIssuer>,
        users: Arc<dyn UserStore>,
        clock: Arc<dyn Clock>,
        metrics: AuthMetrics,
    ) -> Self {
        Self {
            policy,
            dispatcher,
            captcha,
            tokens,
            users,
            clock,
            metrics,
        }
    }

    pub fn captcha(&self) -> &CaptchaService {
        &self.captcha
    }

    /// Send a login code to an already normalized phone number
    pub async fn send_code(
        &self,
        phone: &str,
        captcha: Option<CaptchaAnswer>,
        client: &ClientInfo,
        locale: Locale,
    ) -> Result<SendCodeResult> {
        let result = self.try_send_code(phone, captcha, client, locale).await;
        match &result {
            Ok(sent) => self.metrics.record_send(sent.delivery_status.as_str()),
            Err(e) => self.metrics.record_send(send_failure_label(e)),
        }
        result
    }

    async fn try_send_code(
        &self,
        phone: &str,
        captcha: Option<CaptchaAnswer>,
        client: &ClientInfo,
        locale: Locale,
    ) -> Result<SendCodeResult> {
        if self.captcha.enabled() {
            let Some(answer) = captcha else {
                return Err(AuthError::CaptchaInvalid);
            };
            if !self.captcha.validate(&answer.id, &answer.value).await? {
                info!(phone = %mask_phone(phone), "Captcha rejected");
                return Err(AuthError::CaptchaInvalid);
            }
        }

        self.policy
            .ensure_can_send(phone, client.ip_address.as_deref())
            .await?;

        let code = self.policy.generate(phone).await?;
        let ttl_secs = self.policy.ttl_secs();
        let minutes = (ttl_secs + 59) / 60;
        let masked_code = "*".repeat(code.len());

        let request = SmsRequest {
            phone: phone.to_string(),
            ip_address: client.ip_address.clone(),
            purpose: PURPOSE_OTP.to_string(),
            text: Text::OtpSmsBody {
                code: &code,
                minutes,
            }
            .render(locale),
            masked_text: Text::OtpSmsBody {
                code: &masked_code,
                minutes,
            }
            .render(locale),
            metadata: DeliveryMetadata {
                locale: Some(locale_tag(locale).to_string()),
                user_agent: client.user_agent.clone(),
                otp_expires_at: Some(self.clock.now() + Duration::seconds(ttl_secs)),
            },
        };

        let outcome = match self.dispatcher.send(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // An undelivered code must not stay redeemable
                self.policy.discard(phone, &code).await?;
                return Err(e);
            }
        };

        self.policy
            .attach_delivery_log(phone, &code, outcome.log_id)
            .await?;

        Ok(SendCodeResult {
            expires_in: ttl_secs,
            delivery_log_id: outcome.log_id,
            delivery_status: outcome.status,
        })
    }

    /// Exchange a valid code for a session
    ///
    /// Missing, expired, wrong and exhausted codes are indistinguishable to
    /// the caller.
    pub async fn verify_code(
        &self,
        phone: &str,
        code: &str,
        client: &ClientInfo,
    ) -> Result<TokenPair> {
        let outcome = self.policy.verify_detailed(phone, code).await?;
        self.metrics.record_verify(outcome.as_str());
        if !outcome.is_verified() {
            return Err(AuthError::CodeInvalid);
        }

        let now = self.clock.now();
        let user = self.users.find_or_create_by_phone(phone, now).await?;
        if !user.is_active {
            warn!(phone = %mask_phone(phone), user_id = %user.id, "Login attempt on disabled account");
            return Err(AuthError::AccountDisabled);
        }

        self.users.record_login(user.id, now).await?;

        let pair = self.tokens.issue(&user, client).await?;
        info!(phone = %mask_phone(phone), user_id = %user.id, "Phone login succeeded");
        Ok(pair)
    }

    pub async fn refresh(&self, refresh_token: &str, client: &ClientInfo) -> Result<TokenPair> {
        self.tokens.rotate(refresh_token, client).await
    }

    /// Revoke the presented session, or every session with `all_devices`
    pub async fn logout(
        &self,
        user_id: Uuid,
        refresh_token: Option<&str>,
        all_devices: bool,
    ) -> Result<()> {
        if all_devices {
            self.tokens.revoke_all(user_id).await?;
            return Ok(());
        }
        if let Some(token) = refresh_token {
            if !self.tokens.revoke(user_id, token).await? {
                info!(%user_id, "Logout with unknown refresh token");
            }
        }
        Ok(())
    }

    pub fn authenticate(&self, access_token: &str) -> Result<Claims> {
        self.tokens.authenticate(access_token)
    }
}

fn locale_tag(locale: Locale) -> &'static str {
    match locale {
        Locale::En => "en",
        Locale::Fa => "fa",
    }
}

fn send_failure_label(err: &AuthError) -> &'static str {
    match err {
        AuthError::CaptchaInvalid => "captcha_invalid",
        AuthError::RateLimitExceeded { .. } => "rate_limited",
        AuthError::CooldownActive { .. } => "cooldown",
        AuthError::QuotaExceeded { .. } => "quota",
        AuthError::ProviderUnavailable(_) | AuthError::ProviderRejected { .. } => "provider_error",
        AuthError::SmsNotConfigured => "not_configured",
        _ => "error",
    }
}
