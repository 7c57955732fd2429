//! Marketplace storage and caching layer
//!
//! Provides the storage abstraction shared by the marketplace services:
//! - `KeyValueStore` trait with in-memory and Redis backends
//! - Versioned key schema
//! - Typed JSON helpers with TTL
//! - Injectable clock for expiry
//! - Metrics integration

mod clock;
mod error;
mod keys;
mod memory;
mod metrics;
mod redis_store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, CacheResult};
pub use keys::{CacheKey, ANONYMOUS_USER, CACHE_VERSION};
pub use memory::MemoryStore;
pub use metrics::CacheMetrics;
pub use redis_store::{RedisStore, SharedRedis};

use chrono::Duration;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Default TTL values
pub mod ttl {
    use chrono::Duration;

    /// Generated section sets (30 minutes)
    pub fn sections() -> Duration {
        Duration::minutes(30)
    }

    /// Fallback snapshot of the last good result (7 days)
    pub fn snapshot() -> Duration {
        Duration::days(7)
    }

    /// Preference insights (1 hour)
    pub fn insights() -> Duration {
        Duration::hours(1)
    }

    /// Simulated market data (5 minutes)
    pub fn market_data() -> Duration {
        Duration::minutes(5)
    }
}

/// Raw string key-value operations every backend provides
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value; expired or missing keys return `None`
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a value, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete a key from the store
    async fn del(&self, key: &str) -> CacheResult<()>;

    /// Delete every key starting with `prefix`, returning how many were removed
    async fn scan_del(&self, prefix: &str) -> CacheResult<usize>;

    /// Remove everything owned by this store
    async fn clear(&self) -> CacheResult<()>;
}

/// JSON (de)serialising wrapper around a shared store
#[derive(Clone)]
pub struct TypedCache {
    store: Arc<dyn KeyValueStore>,
}

impl TypedCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Read and decode a value. Corrupted entries are deleted and reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let Some(data) = self.store.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<T>(&data) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache deserialization failed");
                CacheMetrics::new().record_error(key, "deserialize");
                if let Err(e) = self.store.del(key).await {
                    warn!(key = %key, error = %e, "Failed to evict corrupted cache entry");
                }
                Ok(None)
            }
        }
    }

    pub async fn set<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let data = serde_json::to_string(value)?;
        self.store.set(key, data, ttl).await
    }

    pub async fn del(&self, key: &str) -> CacheResult<()> {
        self.store.del(key).await
    }

    pub async fn scan_del(&self, prefix: &str) -> CacheResult<usize> {
        self.store.scan_del(prefix).await
    }
}
