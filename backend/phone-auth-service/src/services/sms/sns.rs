use super::{GatewayError, OutboundSms, ProviderResponse, SmsGateway};
use crate::config::SnsSettings;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_sns::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_sns::types::MessageAttributeValue;
use aws_sdk_sns::Client as SnsClient;
use std::time::Duration;

/// AWS SNS direct-to-phone publish, transactional route
#[derive(Debug, Clone)]
pub struct SnsGateway {
    client: SnsClient,
    sender_id: Option<String>,
}

impl SnsGateway {
    /// Credentials come from the standard AWS provider chain
    pub async fn from_settings(settings: &SnsSettings, timeout: Duration) -> Self {
        let region_provider = match settings.region.clone() {
            Some(region) => RegionProviderChain::first_try(aws_sdk_sns::config::Region::new(region)),
            None => RegionProviderChain::default_provider(),
        }
        .or_else("us-east-1");

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build())
            .load()
            .await;

        Self {
            client: SnsClient::new(&aws_config),
            sender_id: settings.sender_id.clone(),
        }
    }

    fn string_attribute(value: &str) -> Result<MessageAttributeValue, GatewayError> {
        MessageAttributeValue::builder()
            .data_type("String")
            .string_value(value)
            .build()
            .map_err(|e| GatewayError::Transport(format!("Failed to build SMS attribute: {}", e)))
    }
}

#[async_trait]
impl SmsGateway for SnsGateway {
    fn provider_name(&self) -> &'static str {
        "sns"
    }

    async fn send(&self, sms: &OutboundSms) -> Result<ProviderResponse, GatewayError> {
        let mut request = self
            .client
            .publish()
            .phone_number(&sms.to)
            .message(&sms.body)
            .message_attributes("AWS.SNS.SMS.SMSType", Self::string_attribute("Transactional")?);

        if let Some(sender_id) = &self.sender_id {
            request = request.message_attributes("AWS.SNS.SMS.SenderID", Self::string_attribute(sender_id)?);
        }

        match request.send().await {
            Ok(output) => Ok(ProviderResponse::accepted(
                output.message_id().map(str::to_string),
                None,
            )),
            Err(SdkError::ServiceError(context)) => {
                let err = context.err();
                Ok(ProviderResponse::rejected(
                    err.code().map(str::to_string),
                    err.message().map(str::to_string),
                ))
            }
            Err(SdkError::TimeoutError(_)) => Err(GatewayError::Timeout),
            Err(SdkError::ResponseError(e)) => {
                Err(GatewayError::InvalidResponse(format!("{:?}", e)))
            }
            Err(e) => Err(GatewayError::Transport(e.to_string())),
        }
    }
}
