/// HTTP API for phone authentication
///
/// Public JSON endpoints under `/auth`, plus `/health` and `/metrics`.
/// Handlers are thin: they validate the request, call
/// [`PhoneAuthService`](crate::services::PhoneAuthService) and localize errors.
pub mod extractors;
pub mod handlers;

use crate::services::PhoneAuthService;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared HTTP server state
pub struct HttpServerState {
    pub auth: Arc<PhoneAuthService>,
    /// Honour X-Forwarded-For / X-Real-IP
    pub trust_proxy_headers: bool,
    pub request_timeout: Duration,
}

/// Build the HTTP router with all endpoints
pub fn build_router(state: HttpServerState) -> Router {
    let request_timeout = state.request_timeout;
    let state = Arc::new(state);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .route("/auth/captcha", get(handlers::issue_captcha))
        .route("/auth/send-otp", post(handlers::send_otp))
        .route("/auth/verify-otp", post(handlers::verify_otp))
        .route("/auth/refresh", post(handlers::refresh))
        .route("/auth/logout", post(handlers::logout))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn start_http_server<F>(
    state: HttpServerState,
    host: &str,
    port: u16,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Starting phone auth HTTP server on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    Ok(())
}
