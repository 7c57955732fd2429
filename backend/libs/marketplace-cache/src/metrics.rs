//! Cache metrics for observability

use crate::CacheKey;
use prometheus::{CounterVec, Opts, Registry};
use std::sync::OnceLock;

static METRICS: OnceLock<CacheMetricsInner> = OnceLock::new();

struct CacheMetricsInner {
    hits: CounterVec,
    misses: CounterVec,
    expirations: CounterVec,
    writes: CounterVec,
    invalidations: CounterVec,
    errors: CounterVec,
}

fn counter(name: &str, help: &str, labels: &[&str]) -> CounterVec {
    // Names and labels are static literals, so construction cannot fail at runtime.
    CounterVec::new(Opts::new(name, help), labels).expect("valid metric definition")
}

impl CacheMetricsInner {
    fn new() -> Self {
        Self {
            hits: counter("marketplace_cache_hits_total", "Total cache hits", &["entity"]),
            misses: counter(
                "marketplace_cache_misses_total",
                "Total cache misses",
                &["entity"],
            ),
            expirations: counter(
                "marketplace_cache_expirations_total",
                "Entries found past their TTL",
                &["entity"],
            ),
            writes: counter(
                "marketplace_cache_writes_total",
                "Total cache writes",
                &["entity"],
            ),
            invalidations: counter(
                "marketplace_cache_invalidations_total",
                "Total cache invalidations",
                &["entity"],
            ),
            errors: counter(
                "marketplace_cache_errors_total",
                "Total cache errors",
                &["entity", "error_type"],
            ),
        }
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.hits.clone()))?;
        registry.register(Box::new(self.misses.clone()))?;
        registry.register(Box::new(self.expirations.clone()))?;
        registry.register(Box::new(self.writes.clone()))?;
        registry.register(Box::new(self.invalidations.clone()))?;
        registry.register(Box::new(self.errors.clone()))?;
        Ok(())
    }
}

fn get_metrics() -> &'static CacheMetricsInner {
    METRICS.get_or_init(CacheMetricsInner::new)
}

fn extract_entity(key: &str) -> &str {
    CacheKey::entity_type(key).unwrap_or("unknown")
}

/// Cache metrics wrapper
#[derive(Clone, Default)]
pub struct CacheMetrics;

impl CacheMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Register metrics with a Prometheus registry
    pub fn register(registry: &Registry) -> Result<(), prometheus::Error> {
        get_metrics().register(registry)
    }

    pub fn record_hit(&self, key: &str) {
        let entity = extract_entity(key);
        get_metrics().hits.with_label_values(&[entity]).inc();
    }

    pub fn record_miss(&self, key: &str) {
        let entity = extract_entity(key);
        get_metrics().misses.with_label_values(&[entity]).inc();
    }

    pub fn record_expired(&self, key: &str) {
        let entity = extract_entity(key);
        get_metrics().expirations.with_label_values(&[entity]).inc();
    }

    pub fn record_write(&self, key: &str) {
        let entity = extract_entity(key);
        get_metrics().writes.with_label_values(&[entity]).inc();
    }

    pub fn record_invalidation(&self, key: &str) {
        let entity = extract_entity(key);
        get_metrics()
            .invalidations
            .with_label_values(&[entity])
            .inc();
    }

    pub fn record_error(&self, key: &str, error_type: &str) {
        let entity = extract_entity(key);
        get_metrics()
            .errors
            .with_label_values(&[entity, error_type])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        let registry = Registry::new();
        CacheMetrics::register(&registry).unwrap();
        CacheMetrics::new().record_hit("v1:sections:u1:abc");
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "marketplace_cache_hits_total"));
    }
}
