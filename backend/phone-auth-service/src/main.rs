/// Phone Auth Service Main Entry Point
///
/// Starts the HTTP server with:
/// - PostgreSQL connection pool (or in-memory stores outside production)
/// - Redis connection manager (or in-memory counters outside production)
/// - Configured SMS gateway
use anyhow::{bail, Context, Result};
use phone_auth_service::{
    app::{build_service, Backends},
    clock::{Clock, SystemClock},
    config::Settings,
    http::{start_http_server, HttpServerState},
    services::{sms::build_gateway, sms::GatewayState, AuthMetrics},
};
use redis_utils::RedisPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "phone_auth_service=info,info".into()),
        )
        .with_target(false)
        .json()
        .init();

    info!("Starting Phone Auth Service");

    // Load configuration
    let settings = Settings::load().context("Failed to load configuration")?;
    info!(
        environment = ?settings.app.environment,
        "Configuration loaded successfully"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backends = connect_backends(&settings, clock.clone()).await?;

    // SMS gateway (optional outside production)
    let gateway: GatewayState = build_gateway(&settings.sms).await.into();
    match &gateway {
        GatewayState::Ready(g) => info!(provider = g.provider_name(), "SMS gateway ready"),
        GatewayState::NotConfigured => warn!("SMS provider not configured"),
        GatewayState::Misconfigured(reason) => error!(%reason, "SMS provider misconfigured"),
    }

    let metrics = AuthMetrics::new("phone-auth-service");
    let service = build_service(&settings, backends, gateway, clock, metrics)?;

    let state = HttpServerState {
        auth: Arc::new(service),
        trust_proxy_headers: settings.server.trust_proxy_headers,
        request_timeout: Duration::from_secs(settings.server.request_timeout_secs),
    };

    start_http_server(
        state,
        &settings.server.host,
        settings.server.port,
        shutdown_signal(),
    )
    .await?;

    info!("Phone Auth Service stopped");
    Ok(())
}

async fn connect_backends(settings: &Settings, clock: Arc<dyn Clock>) -> Result<Backends> {
    let (database_url, redis_url) = match (&settings.database.url, &settings.redis.url) {
        (Some(database_url), Some(redis_url)) => (database_url, redis_url),
        (None, None) => {
            warn!("Running with in-memory stores; state is lost on restart");
            return Ok(Backends::in_memory(clock));
        }
        _ => bail!("DATABASE_URL and REDIS_URL must be set together"),
    };

    let db_pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .acquire_timeout(Duration::from_secs(settings.database.acquire_timeout))
        .connect(database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    info!(
        "Database pool initialized with {} max connections",
        settings.database.max_connections
    );

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let redis_pool = RedisPool::connect(redis_url)
        .await
        .context("Failed to connect to Redis")?;
    info!("Redis connection manager initialized");

    Ok(Backends::persistent(db_pool, redis_pool.manager()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
