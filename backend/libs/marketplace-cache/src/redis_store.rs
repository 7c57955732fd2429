//! Redis-backed key-value store

use crate::{CacheError, CacheMetrics, CacheResult, KeyValueStore, CACHE_VERSION};
use chrono::Duration;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Pipeline};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Shared Redis connection manager
pub type SharedRedis = Arc<Mutex<ConnectionManager>>;

/// Redis store used when section results are shared between instances
#[derive(Clone)]
pub struct RedisStore {
    redis: SharedRedis,
    metrics: CacheMetrics,
}

impl RedisStore {
    pub fn new(redis: SharedRedis) -> Self {
        Self {
            redis,
            metrics: CacheMetrics::new(),
        }
    }

    /// Open a managed connection to `redis_url`
    pub async fn connect(redis_url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::new(Arc::new(Mutex::new(manager))))
    }

    /// Shave up to 10% off the TTL so entries written together do not expire together.
    /// The result never exceeds `ttl_secs` and is at least one second.
    fn add_jitter(ttl_secs: u64) -> u64 {
        let jitter_percent = (rand::random::<u32>() % 10) as f64 / 100.0;
        let jitter = (ttl_secs as f64 * jitter_percent).round() as u64;
        ttl_secs.saturating_sub(jitter).max(1)
    }
}

#[async_trait::async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.redis.lock().await;

        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(data)) => {
                debug!(key = %key, "Cache hit");
                self.metrics.record_hit(key);
                Ok(Some(data))
            }
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                self.metrics.record_miss(key);
                Ok(None)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Redis get error");
                self.metrics.record_error(key, "redis");
                Err(CacheError::Redis(e))
            }
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.redis.lock().await;

        match ttl {
            Some(ttl) => {
                let secs = u64::try_from(ttl.num_seconds()).unwrap_or(0).max(1);
                let ttl_with_jitter = Self::add_jitter(secs);
                conn.set_ex::<_, _, ()>(key, value, ttl_with_jitter)
                    .await
                    .map_err(CacheError::Redis)?;
                debug!(key = %key, ttl = ttl_with_jitter, "Cache set");
            }
            None => {
                conn.set::<_, _, ()>(key, value)
                    .await
                    .map_err(CacheError::Redis)?;
                debug!(key = %key, "Cache set without expiry");
            }
        }

        self.metrics.record_write(key);
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.redis.lock().await;
        conn.del::<_, ()>(key).await.map_err(CacheError::Redis)?;

        debug!(key = %key, "Cache delete");
        self.metrics.record_invalidation(key);
        Ok(())
    }

    async fn scan_del(&self, prefix: &str) -> CacheResult<usize> {
        let pattern = format!("{}*", prefix);
        let mut conn = self.redis.lock().await;
        let mut cursor: u64 = 0;
        let mut total_deleted = 0;

        loop {
            // SCAN instead of KEYS to avoid blocking
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await
                .map_err(CacheError::Redis)?;

            if !keys.is_empty() {
                let mut pipe = Pipeline::new();
                for key in &keys {
                    pipe.del(key);
                }
                pipe.query_async::<_, ()>(&mut *conn)
                    .await
                    .map_err(CacheError::Redis)?;

                total_deleted += keys.len();
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = %pattern, deleted = total_deleted, "Cache scan delete");
        Ok(total_deleted)
    }

    async fn clear(&self) -> CacheResult<()> {
        let deleted = self.scan_del(&format!("v{}:", CACHE_VERSION)).await?;
        debug!(deleted, "Cache cleared");
        Ok(())
    }
}
