/// REST handlers for phone authentication
///
/// Endpoints:
/// - GET  /auth/captcha     - Issue a captcha challenge
/// - POST /auth/send-otp    - Send a login code by SMS
/// - POST /auth/verify-otp  - Exchange a code for tokens
/// - POST /auth/refresh     - Rotate a refresh token
/// - POST /auth/logout      - Revoke one or all sessions (Bearer)
use super::extractors::{BearerClaims, ClientContext, ValidatedJson};
use super::HttpServerState;
use crate::error::{ApiError, AuthError};
use crate::i18n::Text;
use crate::services::captcha::CaptchaChallenge;
use crate::services::phone_auth::CaptchaAnswer;
use crate::services::token_issuer::TokenPair;
use crate::validators::{normalize_phone, validate_code_digits, validate_phone_shape};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendOtpRequest {
    #[validate(custom(function = "validate_phone_shape"))]
    pub phone: String,
    #[validate(length(min = 1, max = 16))]
    pub captcha: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub captcha_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOtpResponse {
    pub success: bool,
    pub message: String,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    #[validate(custom(function = "validate_phone_shape"))]
    pub phone: String,
    #[validate(length(min = 4, max = 10), custom(function = "validate_code_digits"))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[validate(length(min = 1, max = 256))]
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[validate(length(min = 1, max = 256))]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub all_devices: bool,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::services::metrics::render_default_registry(),
    )
}

/// GET /auth/captcha
pub async fn issue_captcha(
    State(state): State<Arc<HttpServerState>>,
    ctx: ClientContext,
) -> Result<Json<CaptchaChallenge>, ApiError> {
    let challenge = state
        .auth
        .captcha()
        .issue()
        .await
        .map_err(|e| e.localized(ctx.locale))?;
    Ok(Json(challenge))
}

/// POST /auth/send-otp
pub async fn send_otp(
    State(state): State<Arc<HttpServerState>>,
    ctx: ClientContext,
    ValidatedJson(req): ValidatedJson<SendOtpRequest>,
) -> Result<Json<SendOtpResponse>, ApiError> {
    let phone = normalize_phone(&req.phone);
    let captcha = match (req.captcha_id, req.captcha) {
        (Some(id), Some(value)) => Some(CaptchaAnswer { id, value }),
        _ => None,
    };

    let sent = state
        .auth
        .send_code(&phone, captcha, &ctx.client_info(), ctx.locale)
        .await
        .map_err(|e| e.localized(ctx.locale))?;

    Ok(Json(SendOtpResponse {
        success: true,
        message: Text::OtpSent {
            expires_in: sent.expires_in,
        }
        .render(ctx.locale),
        expires_in: sent.expires_in,
    }))
}

/// POST /auth/verify-otp
pub async fn verify_otp(
    State(state): State<Arc<HttpServerState>>,
    ctx: ClientContext,
    ValidatedJson(req): ValidatedJson<VerifyOtpRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let phone = normalize_phone(&req.phone);
    let pair = state
        .auth
        .verify_code(&phone, req.code.trim(), &ctx.client_info())
        .await
        .map_err(|e| e.localized(ctx.locale))?;
    Ok(Json(pair))
}

/// POST /auth/refresh
pub async fn refresh(
    State(state): State<Arc<HttpServerState>>,
    ctx: ClientContext,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let pair = state
        .auth
        .refresh(&req.refresh_token, &ctx.client_info())
        .await
        .map_err(|e| e.localized(ctx.locale))?;
    Ok(Json(pair))
}

/// POST /auth/logout
pub async fn logout(
    State(state): State<Arc<HttpServerState>>,
    ctx: ClientContext,
    BearerClaims(claims): BearerClaims,
    ValidatedJson(req): ValidatedJson<LogoutRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = claims
        .user_id()
        .map_err(|_| AuthError::InvalidToken.localized(ctx.locale))?;

    state
        .auth
        .logout(user_id, req.refresh_token.as_deref(), req.all_devices)
        .await
        .map_err(|e| e.localized(ctx.locale))?;

    Ok(Json(serde_json::json!({})))
}
