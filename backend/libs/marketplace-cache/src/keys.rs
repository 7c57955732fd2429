//! Unified cache key schema
//!
//! All marketplace components build their keys here so that prefix-based
//! invalidation stays consistent.
//! Key format: v{VERSION}:{entity}:{identifier}[:sub_key]

/// Cache schema version - increment when changing key formats or payload shapes
pub const CACHE_VERSION: u32 = 1;

/// Identifier used in keys for sessions without a logged-in user
pub const ANONYMOUS_USER: &str = "anonymous";

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    // ============= Section Keys =============

    /// Generated sections for a user and filter combination
    /// Format: v1:sections:{user_id}:{filter_fingerprint}
    pub fn sections(user_id: Option<&str>, fingerprint: &str) -> String {
        format!(
            "v{}:sections:{}:{}",
            CACHE_VERSION,
            user_id.unwrap_or(ANONYMOUS_USER),
            fingerprint
        )
    }

    /// Prefix covering every cached section set of a user
    pub fn sections_prefix(user_id: Option<&str>) -> String {
        format!(
            "v{}:sections:{}:",
            CACHE_VERSION,
            user_id.unwrap_or(ANONYMOUS_USER)
        )
    }

    /// Every user's cached sections
    pub fn sections_root() -> String {
        format!("v{}:sections:", CACHE_VERSION)
    }

    /// Last successful result, kept much longer for the cached fallback
    /// Format: v1:snapshot:{user_id}
    pub fn sections_snapshot(user_id: Option<&str>) -> String {
        format!(
            "v{}:snapshot:{}",
            CACHE_VERSION,
            user_id.unwrap_or(ANONYMOUS_USER)
        )
    }

    /// Persisted section configuration list
    pub fn section_configs() -> String {
        format!("v{}:config:sections", CACHE_VERSION)
    }

    // ============= Analytics Keys =============

    /// Preference insights for a user
    /// Format: v1:insights:{user_id}
    pub fn insights(user_id: &str) -> String {
        format!("v{}:insights:{}", CACHE_VERSION, user_id)
    }

    /// Section engagement event log
    pub fn engagement_log() -> String {
        format!("v{}:analytics:section_events", CACHE_VERSION)
    }

    // ============= Market Keys =============

    /// Simulated performance metrics for a screen
    /// Format: v1:market:metrics:{screen_id}
    pub fn performance_metrics(screen_id: &str) -> String {
        format!("v{}:market:metrics:{}", CACHE_VERSION, screen_id)
    }

    /// Trending list for a location and window
    /// Format: v1:market:trending:{location}:{window_days}
    pub fn trending(location: Option<&str>, window_days: u32) -> String {
        format!(
            "v{}:market:trending:{}:{}",
            CACHE_VERSION,
            location.map(str::to_lowercase).unwrap_or_else(|| "all".to_string()),
            window_days
        )
    }

    // ============= Utility =============

    /// Extract entity type from key
    pub fn entity_type(key: &str) -> Option<&str> {
        // Format: v{N}:{entity}:...
        let parts: Vec<&str> = key.split(':').collect();
        if parts.len() >= 2 {
            Some(parts[1])
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_key() {
        let key = CacheKey::sections(Some("u1"), "abc");
        assert_eq!(key, "v1:sections:u1:abc");
        assert!(key.starts_with(&CacheKey::sections_prefix(Some("u1"))));
    }

    #[test]
    fn test_anonymous_sections_key() {
        let key = CacheKey::sections(None, "abc");
        assert_eq!(key, "v1:sections:anonymous:abc");
    }

    #[test]
    fn test_trending_key_normalizes_location() {
        assert_eq!(CacheKey::trending(Some("Berlin"), 7), "v1:market:trending:berlin:7");
        assert_eq!(CacheKey::trending(None, 30), "v1:market:trending:all:30");
    }

    #[test]
    fn test_entity_type() {
        assert_eq!(CacheKey::entity_type("v1:sections:u1:x"), Some("sections"));
        assert_eq!(CacheKey::entity_type("v1:market:metrics:s1"), Some("market"));
        assert_eq!(CacheKey::entity_type("invalid"), None);
    }
}
