use super::{http_client, GatewayError, OutboundSms, ProviderResponse, SmsGateway};
use crate::config::TwilioSettings;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Twilio Programmable Messaging
#[derive(Debug, Clone)]
pub struct TwilioGateway {
    client: Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
    from: String,
}

/// Message resource returned on 2xx
#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: Option<String>,
    status: Option<String>,
    error_code: Option<i64>,
    error_message: Option<String>,
}

/// Error document returned on 4xx
#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<i64>,
    message: Option<String>,
}

impl TwilioGateway {
    pub fn from_settings(settings: &TwilioSettings, timeout: Duration) -> Result<Self, GatewayError> {
        let missing = |name| GatewayError::Misconfigured {
            provider: "twilio",
            missing: name,
        };

        Ok(Self {
            client: http_client(timeout)?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            account_sid: settings
                .account_sid
                .clone()
                .ok_or_else(|| missing("TWILIO_ACCOUNT_SID"))?,
            auth_token: settings
                .auth_token
                .clone()
                .ok_or_else(|| missing("TWILIO_AUTH_TOKEN"))?,
            from: settings.from.clone().ok_or_else(|| missing("TWILIO_FROM"))?,
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        )
    }
}

#[async_trait]
impl SmsGateway for TwilioGateway {
    fn provider_name(&self) -> &'static str {
        "twilio"
    }

    async fn send(&self, sms: &OutboundSms) -> Result<ProviderResponse, GatewayError> {
        let form = [
            ("To", sms.to.as_str()),
            ("From", self.from.as_str()),
            ("Body", sms.body.as_str()),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Transport(format!("Twilio returned {}", status)));
        }

        if !status.is_success() {
            let body = response.text().await?;
            let error: ApiError = serde_json::from_str(&body).unwrap_or(ApiError {
                code: None,
                message: Some(format!("HTTP {}", status.as_u16())),
            });
            return Ok(ProviderResponse::rejected(
                error.code.map(|c| c.to_string()),
                error.message,
            ));
        }

        let message: MessageResource = response.json().await?;
        let delivered = !matches!(message.status.as_deref(), Some("failed" | "undelivered"));

        if delivered && message.error_code.is_none() {
            Ok(ProviderResponse::accepted(message.sid, message.status))
        } else {
            Ok(ProviderResponse {
                success: false,
                provider_message_id: message.sid,
                provider_status: message.status,
                error_code: message.error_code.map(|c| c.to_string()),
                error_message: message.error_message,
            })
        }
    }
}
