use prometheus::{Encoder, IntCounterVec, Opts, TextEncoder};
use tracing::warn;

/// Prometheus counters for the login flow
///
/// Registered in the default registry; a second instance in the same process
/// (tests) logs a warning and keeps counting locally.
#[derive(Clone)]
pub struct AuthMetrics {
    /// `outcome`: sent, skipped, captcha_invalid, rate_limited, cooldown, quota, provider_error, ...
    pub otp_send: IntCounterVec,
    /// `outcome`: verified, not_found, expired, exhausted, mismatch
    pub otp_verify: IntCounterVec,
    /// `provider`, `status`: sent, failed, skipped
    pub sms_dispatch: IntCounterVec,
    /// `operation`: issue, rotate, revoke, revoke_all, rejected
    pub token_ops: IntCounterVec,
}

impl AuthMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let otp_send = IntCounterVec::new(
            Opts::new("phone_auth_otp_send_total", "OTP send requests by outcome")
                .const_label("service", service.to_string()),
            &["outcome"],
        )
        .expect("valid metric opts for phone_auth_otp_send_total");

        let otp_verify = IntCounterVec::new(
            Opts::new(
                "phone_auth_otp_verify_total",
                "OTP verification attempts by outcome",
            )
            .const_label("service", service.to_string()),
            &["outcome"],
        )
        .expect("valid metric opts for phone_auth_otp_verify_total");

        let sms_dispatch = IntCounterVec::new(
            Opts::new(
                "phone_auth_sms_dispatch_total",
                "Outbound SMS by provider and final delivery status",
            )
            .const_label("service", service.to_string()),
            &["provider", "status"],
        )
        .expect("valid metric opts for phone_auth_sms_dispatch_total");

        let token_ops = IntCounterVec::new(
            Opts::new(
                "phone_auth_token_operations_total",
                "Refresh token lifecycle operations",
            )
            .const_label("service", service.to_string()),
            &["operation"],
        )
        .expect("valid metric opts for phone_auth_token_operations_total");

        for metric in [
            Box::new(otp_send.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(otp_verify.clone()),
            Box::new(sms_dispatch.clone()),
            Box::new(token_ops.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register phone auth metric: {}", e);
            }
        }

        Self {
            otp_send,
            otp_verify,
            sms_dispatch,
            token_ops,
        }
    }

    pub fn record_send(&self, outcome: &str) {
        self.otp_send.with_label_values(&[outcome]).inc();
    }

    pub fn record_verify(&self, outcome: &str) {
        self.otp_verify.with_label_values(&[outcome]).inc();
    }

    pub fn record_dispatch(&self, provider: &str, status: &str) {
        self.sms_dispatch.with_label_values(&[provider, status]).inc();
    }

    pub fn record_token(&self, operation: &str) {
        self.token_ops.with_label_values(&[operation]).inc();
    }
}

/// Render the default registry in the text exposition format
pub fn render_default_registry() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
