use super::{http_client, GatewayError, OutboundSms, ProviderResponse, SmsGateway};
use crate::config::PanelSettings;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Form-encoded SMS panel REST API
///
/// Success is signalled in the body with `RetStatus == 1`; `Value` then
/// carries the provider message id.
#[derive(Debug, Clone)]
pub struct PanelGateway {
    client: Client,
    send_url: String,
    username: String,
    password: String,
    from: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PanelResponse {
    value: Option<serde_json::Value>,
    ret_status: i64,
    str_ret_status: Option<String>,
}

/// Documented `RetStatus` values other than success
fn describe_status(status: i64) -> &'static str {
    match status {
        0 => "invalid username or password",
        2 => "insufficient credit",
        3 => "daily sending limit reached",
        4 => "sending volume limit reached",
        5 => "invalid sender number",
        6 => "panel under maintenance",
        7 => "message contains a filtered word",
        9 => "public lines cannot send through the web service",
        10 => "user account inactive",
        11 => "message not sent",
        12 => "account documents incomplete",
        35 => "recipient is on the blacklist",
        _ => "unknown panel status",
    }
}

impl PanelGateway {
    pub fn from_settings(settings: &PanelSettings, timeout: Duration) -> Result<Self, GatewayError> {
        let missing = |name| GatewayError::Misconfigured {
            provider: "panel",
            missing: name,
        };

        let base_url = settings
            .base_url
            .clone()
            .ok_or_else(|| missing("SMS_PANEL_BASE_URL"))?;

        Ok(Self {
            client: http_client(timeout)?,
            send_url: format!("{}/api/SendSMS/SendSMS", base_url.trim_end_matches('/')),
            username: settings
                .username
                .clone()
                .ok_or_else(|| missing("SMS_PANEL_USERNAME"))?,
            password: settings
                .password
                .clone()
                .ok_or_else(|| missing("SMS_PANEL_PASSWORD"))?,
            from: settings.from.clone().ok_or_else(|| missing("SMS_PANEL_FROM"))?,
        })
    }
}

#[async_trait]
impl SmsGateway for PanelGateway {
    fn provider_name(&self) -> &'static str {
        "panel"
    }

    async fn send(&self, sms: &OutboundSms) -> Result<ProviderResponse, GatewayError> {
        let form = [
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("to", sms.to.as_str()),
            ("from", self.from.as_str()),
            ("text", sms.body.as_str()),
            ("isflash", "false"),
        ];

        let response = self.client.post(&self.send_url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Transport(format!("SMS panel returned {}", status)));
        }

        let body: PanelResponse = response.json().await?;
        let message_id = body.value.as_ref().map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        });

        if body.ret_status == 1 {
            return Ok(ProviderResponse::accepted(message_id, body.str_ret_status));
        }

        let message = body
            .str_ret_status
            .unwrap_or_else(|| describe_status(body.ret_status).to_string());
        Ok(ProviderResponse::rejected(
            Some(body.ret_status.to_string()),
            Some(message),
        ))
    }
}
