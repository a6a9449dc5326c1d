use crate::i18n::{Locale, QuotaScope, Text};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Captcha invalid")]
    CaptchaInvalid,

    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Cooldown active, retry after {retry_after}s")]
    CooldownActive { retry_after: u64 },

    #[error("Quota exceeded: {scope}")]
    QuotaExceeded { scope: QuotaScope },

    #[error("SMS provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("SMS provider rejected message: {code:?} {message:?}")]
    ProviderRejected {
        code: Option<String>,
        message: Option<String>,
    },

    #[error("SMS provider not configured")]
    SmsNotConfigured,

    /// Single outward signal for missing, expired, wrong and exhausted codes
    #[error("Invalid verification code")]
    CodeInvalid,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// JSON error body returned by every endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<QuotaScope>,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) | AuthError::CaptchaInvalid => StatusCode::BAD_REQUEST,
            AuthError::RateLimitExceeded { .. }
            | AuthError::CooldownActive { .. }
            | AuthError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::ProviderUnavailable(_) | AuthError::ProviderRejected { .. } => {
                StatusCode::BAD_GATEWAY
            }
            AuthError::SmsNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::CodeInvalid | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::AccountDisabled => StatusCode::FORBIDDEN,
            AuthError::Database(_) | AuthError::Redis(_) | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "validation_error",
            AuthError::CaptchaInvalid => "captcha_invalid",
            AuthError::RateLimitExceeded { .. } => "rate_limited",
            AuthError::CooldownActive { .. } => "cooldown_active",
            AuthError::QuotaExceeded { .. } => "quota_exceeded",
            AuthError::ProviderUnavailable(_) => "sms_provider_unavailable",
            AuthError::ProviderRejected { .. } => "sms_provider_rejected",
            AuthError::SmsNotConfigured => "sms_not_configured",
            AuthError::CodeInvalid => "invalid_code",
            AuthError::InvalidToken => "invalid_token",
            AuthError::AccountDisabled => "account_disabled",
            AuthError::Database(_) | AuthError::Redis(_) | AuthError::Internal(_) => {
                "internal_error"
            }
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            AuthError::RateLimitExceeded { retry_after }
            | AuthError::CooldownActive { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Caller-visible text; provider and storage details stay in the logs
    pub fn localized_message(&self, locale: Locale) -> String {
        let text = match self {
            AuthError::Validation(detail) => Text::Validation { detail },
            AuthError::CaptchaInvalid => Text::CaptchaInvalid,
            AuthError::RateLimitExceeded { retry_after } => Text::RateLimited {
                retry_after: *retry_after,
            },
            AuthError::CooldownActive { retry_after } => Text::Cooldown {
                retry_after: *retry_after,
            },
            AuthError::QuotaExceeded { scope } => Text::Quota { scope: *scope },
            AuthError::ProviderUnavailable(_) | AuthError::ProviderRejected { .. } => {
                Text::ProviderFailure
            }
            AuthError::SmsNotConfigured => Text::SmsNotConfigured,
            AuthError::CodeInvalid => Text::InvalidCode,
            AuthError::InvalidToken => Text::InvalidToken,
            AuthError::AccountDisabled => Text::AccountDisabled,
            AuthError::Database(_) | AuthError::Redis(_) | AuthError::Internal(_) => {
                Text::Internal
            }
        };
        text.render(locale)
    }

    pub fn localized(self, locale: Locale) -> ApiError {
        ApiError {
            error: self,
            locale,
        }
    }

    fn into_response_with(self, locale: Locale) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after();
        let scope = match &self {
            AuthError::QuotaExceeded { scope } => Some(*scope),
            _ => None,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = ErrorBody {
            error: self.code(),
            message: self.localized_message(locale),
            retry_after,
            scope,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// An error paired with the locale of the request that produced it
#[derive(Debug)]
pub struct ApiError {
    pub error: AuthError,
    pub locale: Locale,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.error.into_response_with(self.locale)
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        self.into_response_with(Locale::default())
    }
}

// Conversions from external error types
impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", err);
        AuthError::Database(err.to_string())
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!("Redis error: {}", err);
        AuthError::Redis(err.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        let msg = err.to_string();
        // crypto-core reports every rejected token with this prefix
        if msg.contains("Token validation failed") {
            AuthError::InvalidToken
        } else {
            AuthError::Internal(msg)
        }
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Internal(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_failures_share_one_signal() {
        let err = AuthError::CodeInvalid;
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.code(), "invalid_code");
    }

    #[test]
    fn test_throttling_carries_retry_after() {
        let err = AuthError::CooldownActive { retry_after: 30 };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.retry_after(), Some(30));

        let response = err.localized(Locale::En).into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &HeaderValue::from_static("30")
        );
    }

    #[test]
    fn test_internal_details_not_leaked() {
        let err = AuthError::Database("relation \"otp_codes\" does not exist".to_string());
        let message = err.localized_message(Locale::En);
        assert!(!message.contains("otp_codes"));
        assert_eq!(err.code(), "internal_error");
    }

    #[test]
    fn test_provider_rejection_hides_provider_text() {
        let err = AuthError::ProviderRejected {
            code: Some("21211".to_string()),
            message: Some("Invalid 'To' Phone Number".to_string()),
        };
        assert!(!err.localized_message(Locale::En).contains("21211"));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_anyhow_token_error_maps_to_invalid_token() {
        let err: AuthError = anyhow::anyhow!("Token validation failed: ExpiredSignature").into();
        assert!(matches!(err, AuthError::InvalidToken));
    }
}
