use super::HttpServerState;
use crate::error::{ApiError, AuthError};
use crate::i18n::Locale;
use crate::models::ClientInfo;
use axum::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use axum::Json;
use crypto_core::Claims;
use serde::de::DeserializeOwned;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use validator::Validate;

/// Caller details every handler needs: address, agent and language
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub ip: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub locale: Locale,
}

impl ClientContext {
    pub fn client_info(&self) -> ClientInfo {
        ClientInfo::new(self.ip.map(|ip| ip.to_string()), self.user_agent.clone())
    }
}

fn locale_of(headers: &HeaderMap) -> Locale {
    Locale::from_accept_language(
        headers
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok()),
    )
}

/// Client address
///
/// Priority when proxy headers are trusted:
/// 1. X-Forwarded-For (first entry)
/// 2. X-Real-IP
/// 3. Socket address
fn client_ip(parts: &Parts, trust_proxy_headers: bool) -> Option<IpAddr> {
    if trust_proxy_headers {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }

        let real_ip = parts
            .headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<IpAddr>().ok());
        if real_ip.is_some() {
            return real_ip;
        }
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

#[async_trait]
impl FromRequestParts<Arc<HttpServerState>> for ClientContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<HttpServerState>,
    ) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.chars().take(512).collect());

        Ok(Self {
            ip: client_ip(parts, state.trust_proxy_headers),
            user_agent,
            locale: locale_of(&parts.headers),
        })
    }
}

/// Claims of a valid `Authorization: Bearer` access token
#[derive(Debug, Clone)]
pub struct BearerClaims(pub Claims);

#[async_trait]
impl FromRequestParts<Arc<HttpServerState>> for BearerClaims {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<HttpServerState>,
    ) -> Result<Self, Self::Rejection> {
        let locale = locale_of(&parts.headers);
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::InvalidToken.localized(locale))?;

        state
            .auth
            .authenticate(token)
            .map(BearerClaims)
            .map_err(|e| e.localized(locale))
    }
}

/// JSON body deserialized and checked with `validator` before the handler runs
#[derive(Debug, Clone)]
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let locale = locale_of(req.headers());
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| {
                AuthError::Validation(rejection.body_text()).localized(locale)
            })?;

        value
            .validate()
            .map_err(|e| AuthError::from(e).localized(locale))?;
        Ok(ValidatedJson(value))
    }
}
