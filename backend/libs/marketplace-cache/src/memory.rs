//! In-process key-value store with TTL expiry driven by an injected clock.

use crate::{CacheMetrics, CacheResult, Clock, KeyValueStore, SystemClock};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// DashMap-backed store. Expired entries are removed lazily on read.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    metrics: CacheMetrics,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
            metrics: CacheMetrics::new(),
        }
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|e| e.expires_at.map_or(true, |at| at > now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = self.clock.now();

        let expired = match self.entries.get(key) {
            Some(entry) => match entry.expires_at {
                Some(at) if at <= now => true,
                _ => {
                    debug!(key = %key, "Memory store hit");
                    self.metrics.record_hit(key);
                    return Ok(Some(entry.value.clone()));
                }
            },
            None => {
                debug!(key = %key, "Memory store miss");
                self.metrics.record_miss(key);
                return Ok(None);
            }
        };

        if expired {
            self.entries.remove(key);
            debug!(key = %key, "Memory store entry expired");
            self.metrics.record_expired(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let expires_at = ttl.map(|ttl| self.clock.now() + ttl);
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        self.metrics.record_write(key);
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        self.metrics.record_invalidation(key);
        Ok(())
    }

    async fn scan_del(&self, prefix: &str) -> CacheResult<usize> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        let deleted = before - self.entries.len();
        debug!(prefix = %prefix, deleted, "Memory store prefix delete");
        Ok(deleted)
    }

    async fn clear(&self) -> CacheResult<()> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        store.set("v1:test:a", "1".to_string(), None).await.unwrap();
        assert_eq!(store.get("v1:test:a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.get("v1:test:b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_expire_with_clock() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryStore::with_clock(clock.clone());

        store
            .set("v1:test:a", "1".to_string(), Some(Duration::minutes(30)))
            .await
            .unwrap();

        clock.advance(Duration::minutes(29));
        assert!(store.get("v1:test:a").await.unwrap().is_some());

        clock.advance(Duration::minutes(1));
        assert!(store.get("v1:test:a").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_scan_del_by_prefix() {
        let store = MemoryStore::new();
        store.set("v1:sections:u1:a", "x".into(), None).await.unwrap();
        store.set("v1:sections:u1:b", "x".into(), None).await.unwrap();
        store.set("v1:sections:u2:a", "x".into(), None).await.unwrap();

        let deleted = store.scan_del("v1:sections:u1:").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_clear() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            tokio_test::assert_ok!(store.set("v1:a:1", "x".into(), None).await);
            tokio_test::assert_ok!(store.clear().await);
            assert!(store.is_empty());
        });
    }
}
