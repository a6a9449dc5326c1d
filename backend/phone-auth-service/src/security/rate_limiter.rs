/// Attempt counters with a sliding decay window
///
/// Every hit re-arms the window to `decay_secs` from now, so a caller that
/// keeps retrying while blocked stays blocked. The counter disappears once
/// a full window passes without hits.
use crate::clock::Clock;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use redis::AsyncCommands;
use redis_utils::{connection, with_timeout, SharedConnectionManager};
use std::sync::Arc;

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Counter for `key` has reached `max_attempts`
    async fn too_many_attempts(&self, key: &str, max_attempts: u64) -> Result<bool>;

    /// Increment the counter and push its reset to `decay_secs` from now.
    /// Returns the new count.
    async fn hit(&self, key: &str, decay_secs: u64) -> Result<u64>;

    /// Seconds until the counter resets; 0 when no window is open
    async fn available_in(&self, key: &str) -> Result<u64>;

    async fn clear(&self, key: &str) -> Result<()>;
}

/// Redis-backed limiter shared across instances
pub struct RedisRateLimiter {
    redis: SharedConnectionManager,
    prefix: String,
}

impl RedisRateLimiter {
    pub fn new(redis: SharedConnectionManager) -> Self {
        Self {
            redis,
            prefix: "phone_auth:rate".to_string(),
        }
    }

    fn key(&self, key: &str) -> String {
        redis_utils::key(&self.prefix, &[key])
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn too_many_attempts(&self, key: &str, max_attempts: u64) -> Result<bool> {
        let mut conn = connection(&self.redis).await;
        let count: Option<u64> = with_timeout(conn.get(self.key(key))).await?;
        Ok(count.unwrap_or(0) >= max_attempts)
    }

    async fn hit(&self, key: &str, decay_secs: u64) -> Result<u64> {
        let key = self.key(key);
        let mut conn = connection(&self.redis).await;

        let (count,): (u64,) = with_timeout(
            redis::pipe()
                .atomic()
                .incr(&key, 1)
                .expire(&key, decay_secs.max(1) as i64)
                .ignore()
                .query_async(&mut conn),
        )
        .await?;

        Ok(count)
    }

    async fn available_in(&self, key: &str) -> Result<u64> {
        let mut conn = connection(&self.redis).await;
        let ttl: i64 = with_timeout(conn.ttl(self.key(key))).await?;
        // -2 missing key, -1 no expiry
        Ok(ttl.max(0) as u64)
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let mut conn = connection(&self.redis).await;
        let _: () = with_timeout(conn.del(self.key(key))).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    resets_at: DateTime<Utc>,
}

/// Single-process limiter driven by the injected clock
pub struct MemoryRateLimiter {
    windows: DashMap<String, Window>,
    clock: Arc<dyn Clock>,
}

impl MemoryRateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    fn open_window(&self, key: &str) -> Option<Window> {
        let now = self.clock.now();
        let window = self.windows.get(key).map(|w| *w)?;
        if window.resets_at > now {
            Some(window)
        } else {
            self.windows.remove_if(key, |_, w| w.resets_at <= now);
            None
        }
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn too_many_attempts(&self, key: &str, max_attempts: u64) -> Result<bool> {
        Ok(self
            .open_window(key)
            .map(|w| w.count >= max_attempts)
            .unwrap_or(false))
    }

    async fn hit(&self, key: &str, decay_secs: u64) -> Result<u64> {
        let now = self.clock.now();
        let fresh = Window {
            count: 0,
            resets_at: now + Duration::seconds(decay_secs.max(1) as i64),
        };

        let mut window = self.windows.entry(key.to_string()).or_insert(fresh);
        if window.resets_at <= now {
            *window = fresh;
        }
        window.count += 1;
        window.resets_at = fresh.resets_at;
        Ok(window.count)
    }

    async fn available_in(&self, key: &str) -> Result<u64> {
        let now = self.clock.now();
        Ok(self
            .open_window(key)
            .map(|w| (w.resets_at - now).num_seconds().max(0) as u64)
            .unwrap_or(0))
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.windows.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter() -> (MemoryRateLimiter, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        (MemoryRateLimiter::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_trips_at_max_attempts() {
        let (limiter, _clock) = limiter();
        for _ in 0..3 {
            assert!(!limiter.too_many_attempts("k", 3).await.unwrap());
            limiter.hit("k", 60).await.unwrap();
        }
        assert!(limiter.too_many_attempts("k", 3).await.unwrap());
        assert_eq!(limiter.available_in("k").await.unwrap(), 60);
    }

    #[tokio::test]
    async fn test_each_hit_rearms_window() {
        let (limiter, clock) = limiter();
        limiter.hit("k", 60).await.unwrap();
        clock.advance_secs(45);
        limiter.hit("k", 60).await.unwrap();
        assert_eq!(limiter.available_in("k").await.unwrap(), 60);

        clock.advance_secs(59);
        assert!(limiter.too_many_attempts("k", 2).await.unwrap());

        clock.advance_secs(1);
        assert!(!limiter.too_many_attempts("k", 1).await.unwrap());
        assert_eq!(limiter.hit("k", 60).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_resets_counter() {
        let (limiter, _clock) = limiter();
        limiter.hit("k", 60).await.unwrap();
        limiter.clear("k").await.unwrap();
        assert_eq!(limiter.available_in("k").await.unwrap(), 0);
        assert!(!limiter.too_many_attempts("k", 1).await.unwrap());
    }
}
