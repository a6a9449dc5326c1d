/// Outbound SMS providers
///
/// A gateway performs exactly one delivery attempt per call. Provider-level
/// refusals come back as `Ok(ProviderResponse { success: false, .. })`;
/// `Err` is reserved for transport failures, timeouts and responses that
/// cannot be interpreted.
use crate::config::{SmsProviderKind, SmsSettings};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod dispatcher;
pub mod panel;
pub mod sns;
pub mod twilio;

pub use dispatcher::{DispatchOutcome, GatewayState, SmsDispatcher, SmsRequest};
pub use panel::PanelGateway;
pub use sns::SnsGateway;
pub use twilio::TwilioGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("SMS transport error: {0}")]
    Transport(String),

    #[error("SMS provider timed out")]
    Timeout,

    #[error("Unexpected SMS provider response: {0}")]
    InvalidResponse(String),

    #[error("SMS provider {provider} is missing {missing}")]
    Misconfigured {
        provider: &'static str,
        missing: &'static str,
    },
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::InvalidResponse(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// One message to deliver
#[derive(Debug, Clone)]
pub struct OutboundSms {
    pub to: String,
    pub body: String,
}

/// Provider verdict for a delivery attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResponse {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub provider_status: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl ProviderResponse {
    pub fn accepted(message_id: Option<String>, status: Option<String>) -> Self {
        Self {
            success: true,
            provider_message_id: message_id,
            provider_status: status,
            ..Default::default()
        }
    }

    pub fn rejected(code: Option<String>, message: Option<String>) -> Self {
        Self {
            success: false,
            error_code: code,
            error_message: message,
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait SmsGateway: Send + Sync {
    /// Stable provider name recorded in delivery logs
    fn provider_name(&self) -> &'static str;

    async fn send(&self, sms: &OutboundSms) -> Result<ProviderResponse, GatewayError>;
}

/// Build the configured gateway
///
/// `Ok(None)` when no provider is selected; `Err(Misconfigured)` when the
/// selected provider lacks credentials.
pub async fn build_gateway(
    settings: &SmsSettings,
) -> Result<Option<Arc<dyn SmsGateway>>, GatewayError> {
    let Some(kind) = settings.provider else {
        return Ok(None);
    };
    let timeout = Duration::from_secs(settings.request_timeout_secs.max(1));

    let gateway: Arc<dyn SmsGateway> = match kind {
        SmsProviderKind::Twilio => Arc::new(TwilioGateway::from_settings(&settings.twilio, timeout)?),
        SmsProviderKind::Panel => Arc::new(PanelGateway::from_settings(&settings.panel, timeout)?),
        SmsProviderKind::Sns => Arc::new(SnsGateway::from_settings(&settings.sns, timeout).await),
    };

    tracing::info!(provider = gateway.provider_name(), "SMS gateway configured");
    Ok(Some(gateway))
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GatewayError::Transport(format!("failed to build HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TwilioSettings;

    #[tokio::test]
    async fn test_no_provider_selected() {
        let settings = SmsSettings::default();
        assert!(build_gateway(&settings).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_selected_provider_without_credentials_is_misconfigured() {
        let settings = SmsSettings {
            provider: Some(SmsProviderKind::Twilio),
            twilio: TwilioSettings {
                base_url: "https://api.twilio.com".to_string(),
                account_sid: Some("AC123".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        match build_gateway(&settings).await {
            Err(GatewayError::Misconfigured { provider, missing }) => {
                assert_eq!(provider, "twilio");
                assert_eq!(missing, "TWILIO_AUTH_TOKEN");
            }
            other => panic!("expected misconfiguration, got {:?}", other.map(|g| g.is_some())),
        }
    }
}
