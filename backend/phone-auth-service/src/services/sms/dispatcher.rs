use super::{GatewayError, OutboundSms, SmsGateway};
use crate::clock::Clock;
use crate::db::DeliveryLogStore;
use crate::error::{AuthError, Result};
use crate::models::{DeliveryMetadata, DeliveryStatus, NewDeliveryLog};
use crate::services::metrics::AuthMetrics;
use crate::validators::mask_phone;
use crypto_core::hash::sha256_hex;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

const NOT_CONFIGURED: &str = "provider_not_configured";

/// What the process knows about its SMS provider
#[derive(Clone)]
pub enum GatewayState {
    Ready(Arc<dyn SmsGateway>),
    NotConfigured,
    /// Provider selected but unusable; carries the reason
    Misconfigured(String),
}

impl GatewayState {
    fn provider_name(&self) -> &'static str {
        match self {
            GatewayState::Ready(gateway) => gateway.provider_name(),
            GatewayState::NotConfigured | GatewayState::Misconfigured(_) => "none",
        }
    }
}

impl From<std::result::Result<Option<Arc<dyn SmsGateway>>, GatewayError>> for GatewayState {
    fn from(built: std::result::Result<Option<Arc<dyn SmsGateway>>, GatewayError>) -> Self {
        match built {
            Ok(Some(gateway)) => GatewayState::Ready(gateway),
            Ok(None) => GatewayState::NotConfigured,
            Err(e) => GatewayState::Misconfigured(e.to_string()),
        }
    }
}

/// A message plus the audit context it is logged with
#[derive(Debug, Clone)]
pub struct SmsRequest {
    pub phone: String,
    pub ip_address: Option<String>,
    pub purpose: String,
    /// Text delivered to the handset
    pub text: String,
    /// Text persisted in the log, secrets masked
    pub masked_text: String,
    pub metadata: DeliveryMetadata,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub log_id: Uuid,
    pub status: DeliveryStatus,
    pub provider_message_id: Option<String>,
}

/// Sends one SMS and records the attempt
///
/// Every call writes exactly one log row, which ends in `sent`, `failed` or
/// `skipped`. No retries.
pub struct SmsDispatcher {
    gateway: GatewayState,
    logs: Arc<dyn DeliveryLogStore>,
    clock: Arc<dyn Clock>,
    production: bool,
    metrics: AuthMetrics,
}

impl SmsDispatcher {
    pub fn new(
        gateway: GatewayState,
        logs: Arc<dyn DeliveryLogStore>,
        clock: Arc<dyn Clock>,
        production: bool,
        metrics: AuthMetrics,
    ) -> Self {
        Self {
            gateway,
            logs,
            clock,
            production,
            metrics,
        }
    }

    pub async fn send(&self, request: SmsRequest) -> Result<DispatchOutcome> {
        let provider = self.gateway.provider_name();
        let masked_phone = mask_phone(&request.phone);

        let log = self
            .logs
            .insert(NewDeliveryLog {
                phone: request.phone.clone(),
                ip_address: request.ip_address.clone(),
                purpose: request.purpose.clone(),
                provider: provider.to_string(),
                message: request.masked_text.clone(),
                message_hash: sha256_hex(&request.text),
                metadata: request.metadata.clone(),
                requested_at: self.clock.now(),
            })
            .await?;

        let gateway = match &self.gateway {
            GatewayState::Ready(gateway) => gateway.clone(),
            GatewayState::NotConfigured => return self.unconfigured(log.id, &masked_phone, None).await,
            GatewayState::Misconfigured(reason) => {
                return self.unconfigured(log.id, &masked_phone, Some(reason)).await
            }
        };

        let sms = OutboundSms {
            to: request.phone,
            body: request.text,
        };

        match gateway.send(&sms).await {
            Ok(response) if response.success => {
                self.logs
                    .mark_sent(log.id, response.provider_message_id.as_deref(), self.clock.now())
                    .await?;
                self.metrics.record_dispatch(provider, DeliveryStatus::Sent.as_str());
                info!(
                    phone = %masked_phone,
                    provider,
                    log_id = %log.id,
                    message_id = ?response.provider_message_id,
                    "SMS sent successfully"
                );
                Ok(DispatchOutcome {
                    log_id: log.id,
                    status: DeliveryStatus::Sent,
                    provider_message_id: response.provider_message_id,
                })
            }
            Ok(response) => {
                self.logs
                    .mark_failed(
                        log.id,
                        response.error_code.as_deref(),
                        response.error_message.as_deref(),
                    )
                    .await?;
                self.metrics.record_dispatch(provider, DeliveryStatus::Failed.as_str());
                warn!(
                    phone = %masked_phone,
                    provider,
                    log_id = %log.id,
                    error_code = ?response.error_code,
                    error_message = ?response.error_message,
                    "SMS provider rejected message"
                );
                Err(AuthError::ProviderRejected {
                    code: response.error_code,
                    message: response.error_message,
                })
            }
            Err(e) => {
                let code = match &e {
                    GatewayError::Timeout => "timeout",
                    GatewayError::InvalidResponse(_) => "invalid_response",
                    GatewayError::Transport(_) | GatewayError::Misconfigured { .. } => "transport",
                };
                let detail = e.to_string();
                self.logs.mark_failed(log.id, Some(code), Some(&detail)).await?;
                self.metrics.record_dispatch(provider, DeliveryStatus::Failed.as_str());
                error!(
                    phone = %masked_phone,
                    provider,
                    log_id = %log.id,
                    error = %detail,
                    "Failed to send SMS"
                );
                Err(AuthError::ProviderUnavailable(detail))
            }
        }
    }

    async fn unconfigured(
        &self,
        log_id: Uuid,
        masked_phone: &str,
        reason: Option<&String>,
    ) -> Result<DispatchOutcome> {
        if self.production {
            self.logs
                .mark_failed(log_id, Some(NOT_CONFIGURED), reason.map(String::as_str))
                .await?;
            self.metrics.record_dispatch("none", DeliveryStatus::Failed.as_str());
            error!(phone = %masked_phone, %log_id, reason = ?reason, "SMS provider not configured");
            return Err(AuthError::SmsNotConfigured);
        }

        self.logs.mark_skipped(log_id, NOT_CONFIGURED).await?;
        self.metrics.record_dispatch("none", DeliveryStatus::Skipped.as_str());
        warn!(
            phone = %masked_phone,
            %log_id,
            reason = ?reason,
            "SMS provider not configured; message skipped (development mode)"
        );
        Ok(DispatchOutcome {
            log_id,
            status: DeliveryStatus::Skipped,
            provider_message_id: None,
        })
    }
}
