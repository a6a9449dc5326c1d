// Shared harness for the phone auth integration tests
//
// Builds the full router over in-memory stores, a manually driven clock
// and a gateway that records every outgoing message instead of sending it.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use phone_auth_service::app::{build_service, Backends};
use phone_auth_service::clock::{Clock, ManualClock};
use phone_auth_service::db::{MemoryDeliveryLogStore, MemoryUserStore};
use phone_auth_service::config::{
    AppEnvironment, AppSettings, CaptchaSettings, DatabaseSettings, JwtSettings, OtpSettings,
    RedisSettings, RefreshTokenSettings, ServerSettings, Settings, SmsSettings,
};
use phone_auth_service::http::{build_router, HttpServerState};
use phone_auth_service::security::OtpHasher;
use phone_auth_service::services::captcha::{CaptchaStore, MemoryCaptchaStore};
use phone_auth_service::services::sms::{
    GatewayError, GatewayState, OutboundSms, ProviderResponse, SmsGateway,
};
use phone_auth_service::services::AuthMetrics;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

pub const PHONE: &str = "+14155552671";
pub const HASH_KEY: &str = "integration-test-hash-key";
/// Every captcha issued by the harness answers to this
pub const CAPTCHA_ANSWER: &str = "K7PQ2";

pub fn test_settings(otp: OtpSettings, captcha_enabled: bool) -> Settings {
    Settings {
        app: AppSettings {
            name: "phone-auth-service".to_string(),
            environment: AppEnvironment::Testing,
        },
        database: DatabaseSettings {
            url: None,
            max_connections: 1,
            acquire_timeout: 1,
        },
        redis: RedisSettings { url: None },
        server: ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            trust_proxy_headers: true,
            request_timeout_secs: 5,
        },
        jwt: JwtSettings {
            signing_key: "integration-test-jwt-secret-with-enough-bytes".to_string(),
            validation_key: None,
            algorithm: "HS256".to_string(),
            issuer: "liftrace-auth".to_string(),
            access_ttl_secs: 900,
        },
        refresh_token: RefreshTokenSettings::default(),
        otp: OtpSettings {
            hash_key: HASH_KEY.to_string(),
            ..otp
        },
        sms: SmsSettings::default(),
        captcha: CaptchaSettings {
            enabled: captcha_enabled,
            hash_key: HASH_KEY.to_string(),
            ..CaptchaSettings::default()
        },
    }
}

/// Captures messages; optionally refuses them like a provider would
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<OutboundSms>>,
    reject: Mutex<bool>,
}

impl RecordingGateway {
    pub fn messages(&self) -> Vec<OutboundSms> {
        self.sent.lock().unwrap().clone()
    }

    pub fn reject_next(&self, reject: bool) {
        *self.reject.lock().unwrap() = reject;
    }

    /// Digits of the most recent code sent to `phone`
    pub fn last_code_for(&self, phone: &str) -> String {
        let sent = self.sent.lock().unwrap();
        let sms = sent
            .iter()
            .rev()
            .find(|sms| sms.to == phone)
            .unwrap_or_else(|| panic!("no SMS sent to {}", phone));
        extract_code(&sms.body)
    }
}

pub fn extract_code(body: &str) -> String {
    body.split(|c: char| !c.is_ascii_digit())
        .find(|run| run.len() >= 4)
        .map(str::to_string)
        .unwrap_or_else(|| panic!("no code in {:?}", body))
}

#[async_trait]
impl SmsGateway for RecordingGateway {
    fn provider_name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, sms: &OutboundSms) -> Result<ProviderResponse, GatewayError> {
        if *self.reject.lock().unwrap() {
            return Ok(ProviderResponse::rejected(
                Some("21610".to_string()),
                Some("Attempt to send to unsubscribed recipient".to_string()),
            ));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(sms.clone());
        Ok(ProviderResponse::accepted(
            Some(format!("SM{:04}", sent.len())),
            Some("queued".to_string()),
        ))
    }
}

/// Stores the hash of [`CAPTCHA_ANSWER`] for every issued challenge
pub struct KnownAnswerCaptchaStore {
    inner: MemoryCaptchaStore,
    hasher: OtpHasher,
}

#[async_trait]
impl CaptchaStore for KnownAnswerCaptchaStore {
    async fn put(
        &self,
        id: &str,
        _answer_hash: &str,
        ttl_secs: u64,
    ) -> phone_auth_service::Result<()> {
        let hash = self.hasher.hash(id, CAPTCHA_ANSWER);
        self.inner.put(id, &hash, ttl_secs).await
    }

    async fn take(&self, id: &str) -> phone_auth_service::Result<Option<String>> {
        self.inner.take(id).await
    }
}

pub struct TestApp {
    pub router: Router,
    pub clock: ManualClock,
    pub sms: Arc<RecordingGateway>,
    pub delivery_logs: Arc<MemoryDeliveryLogStore>,
    pub users: Arc<MemoryUserStore>,
    pub backends: Backends,
}

impl TestApp {
    pub fn new(otp: OtpSettings, captcha_enabled: bool) -> Self {
        Self::with_backends(otp, captcha_enabled, |_| {})
    }

    /// Like [`TestApp::new`], with a hook to swap stores before the service is built
    pub fn with_backends<F>(otp: OtpSettings, captcha_enabled: bool, customize: F) -> Self
    where
        F: FnOnce(&mut Backends),
    {
        // RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let settings = test_settings(otp, captcha_enabled);
        let clock = ManualClock::new(Utc::now());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

        let delivery_logs = Arc::new(MemoryDeliveryLogStore::new());
        let mut backends = Backends::in_memory(shared_clock.clone());
        backends.delivery_logs = delivery_logs.clone();
        let users = Arc::new(MemoryUserStore::new());
        backends.users = users.clone();
        backends.captcha = Arc::new(KnownAnswerCaptchaStore {
            inner: MemoryCaptchaStore::new(shared_clock.clone()),
            hasher: OtpHasher::new(HASH_KEY),
        });
        customize(&mut backends);

        let sms = Arc::new(RecordingGateway::default());
        let gateway = GatewayState::Ready(sms.clone());

        let service = build_service(
            &settings,
            backends.clone(),
            gateway,
            shared_clock,
            AuthMetrics::new("phone-auth-service-test"),
        )
        .expect("service builds");

        let router = build_router(HttpServerState {
            auth: Arc::new(service),
            trust_proxy_headers: settings.server.trust_proxy_headers,
            request_timeout: Duration::from_secs(settings.server.request_timeout_secs),
        });

        Self {
            router,
            clock,
            sms,
            delivery_logs,
            users,
            backends,
        }
    }

    /// Throttling off, captcha off
    pub fn unthrottled() -> Self {
        Self::new(OtpSettings::unthrottled(), false)
    }

    pub async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");

        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        let text = String::from_utf8_lossy(&bytes).to_string();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse {
            status,
            retry_after,
            text,
            json,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .expect("request builds");
        self.request(request).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.request(json_request(uri, body, &[])).await
    }

    pub async fn send_otp(&self, phone: &str) -> TestResponse {
        self.post("/auth/send-otp", serde_json::json!({ "phone": phone }))
            .await
    }

    pub async fn verify_otp(&self, phone: &str, code: &str) -> TestResponse {
        self.post(
            "/auth/verify-otp",
            serde_json::json!({ "phone": phone, "code": code }),
        )
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> TestResponse {
        self.post(
            "/auth/refresh",
            serde_json::json!({ "refreshToken": refresh_token }),
        )
        .await
    }

    /// Send and verify a code; returns the token pair body
    pub async fn login(&self, phone: &str) -> Value {
        let sent = self.send_otp(phone).await;
        assert_eq!(sent.status, StatusCode::OK, "send failed: {}", sent.text);
        let code = self.sms.last_code_for(phone);
        let verified = self.verify_otp(phone, &code).await;
        assert_eq!(verified.status, StatusCode::OK, "verify failed: {}", verified.text);
        verified.json
    }
}

pub fn json_request(uri: &str, body: Value, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub retry_after: Option<String>,
    pub text: String,
    pub json: Value,
}

impl TestResponse {
    pub fn error_code(&self) -> &str {
        self.json["error"].as_str().unwrap_or_default()
    }
}
