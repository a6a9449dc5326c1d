use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::info;

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Default per-command deadline.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Redis connection pool.
pub struct RedisPool {
    manager: SharedConnectionManager,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("failed to construct Redis client")?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;

        info!("Redis connection manager ready");

        Ok(Self {
            manager: Arc::new(Mutex::new(connection_manager)),
        })
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }
}

/// Clone a connection handle out of the shared manager.
///
/// The lock is only held for the clone; commands run on the clone.
pub async fn connection(manager: &SharedConnectionManager) -> ConnectionManager {
    manager.lock().await.clone()
}

/// Run a Redis future with the default command deadline.
pub async fn with_timeout<F, T>(fut: F) -> std::result::Result<T, RedisError>
where
    F: Future<Output = std::result::Result<T, RedisError>>,
{
    with_deadline(DEFAULT_COMMAND_TIMEOUT, fut).await
}

/// Run a Redis future with an explicit deadline, mapping expiry to an IO error.
pub async fn with_deadline<F, T>(deadline: Duration, fut: F) -> std::result::Result<T, RedisError>
where
    F: Future<Output = std::result::Result<T, RedisError>>,
{
    match timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(RedisError::from((
            redis::ErrorKind::IoError,
            "redis command timed out",
        ))),
    }
}

/// Build a namespaced key: `prefix:part1:part2`.
pub fn key(prefix: &str, parts: &[&str]) -> String {
    let mut key = String::from(prefix);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}
