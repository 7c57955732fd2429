// ============================================
// Section Configuration Manager
// ============================================
//
// Holds the section catalogue used by the orchestrator. Read-only during a
// generation cycle; updates and toggles are persisted through the store and
// restored by `load()`.

use crate::error::{Result, ServiceError};
use crate::models::{AlgorithmType, DisplayType, SectionConditions, SectionConfig, SectionConfigPatch};
use marketplace_cache::{CacheKey, TypedCache};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Built-in section catalogue
pub fn default_sections() -> Vec<SectionConfig> {
    let personal = |min_interactions| SectionConditions {
        requires_login: true,
        min_interactions,
        ..Default::default()
    };

    vec![
        SectionConfig::new("top-picks", "Top Picks for You", AlgorithmType::MlPersonalized, 100, 4, 12)
            .with_subtitle("Screens matched to your campaigns")
            .with_conditions(personal(1))
            .with_layout(DisplayType::Featured),
        SectionConfig::new("recently-viewed", "Recently Viewed", AlgorithmType::RecentlyViewed, 95, 2, 8)
            .with_conditions(personal(1)),
        SectionConfig::new(
            "because-you-viewed",
            "Because You Viewed",
            AlgorithmType::ContentBased,
            90,
            3,
            8,
        )
        .with_conditions(personal(1)),
        SectionConfig::new("trending", "Trending Now", AlgorithmType::TrendingAnalysis, 85, 4, 12)
            .with_subtitle("Most booked this week"),
        SectionConfig::new(
            "similar-advertisers",
            "Advertisers Like You Booked",
            AlgorithmType::CollaborativeFiltering,
            80,
            3,
            10,
        )
        .with_conditions(personal(5)),
        SectionConfig::new("near-you", "Near You", AlgorithmType::GeographicProximity, 75, 3, 10)
            .with_conditions(SectionConditions {
                requires_location: true,
                ..Default::default()
            })
            .with_layout(DisplayType::Grid),
        SectionConfig::new(
            "top-performing",
            "Top Performing",
            AlgorithmType::PerformanceBased,
            70,
            4,
            10,
        ),
        SectionConfig::new(
            "new-discoveries",
            "New on the Marketplace",
            AlgorithmType::NewDiscovery,
            65,
            3,
            10,
        ),
        SectionConfig::new("popular", "Popular Screens", AlgorithmType::FallbackPopular, 50, 4, 12)
            .with_layout(DisplayType::Grid),
    ]
}

fn validate(config: &SectionConfig) -> Result<()> {
    if config.title.trim().is_empty() {
        return Err(ServiceError::InvalidConfig(format!(
            "section {} needs a title",
            config.id
        )));
    }
    if config.max_screens == 0 {
        return Err(ServiceError::InvalidConfig(format!(
            "section {} must allow at least one screen",
            config.id
        )));
    }
    if config.min_screens > config.max_screens {
        return Err(ServiceError::InvalidConfig(format!(
            "section {}: min_screens {} exceeds max_screens {}",
            config.id, config.min_screens, config.max_screens
        )));
    }
    Ok(())
}

pub struct SectionConfigManager {
    configs: RwLock<Vec<SectionConfig>>,
    cache: TypedCache,
}

impl SectionConfigManager {
    pub fn new(cache: TypedCache) -> Self {
        Self::with_sections(cache, default_sections())
    }

    pub fn with_sections(cache: TypedCache, sections: Vec<SectionConfig>) -> Self {
        Self {
            configs: RwLock::new(sections),
            cache,
        }
    }

    /// Restore persisted configuration; keeps the current one when nothing is stored
    pub async fn load(&self) -> Result<usize> {
        let stored: Option<Vec<SectionConfig>> = self.cache.get(&CacheKey::section_configs()).await?;
        let Some(stored) = stored else {
            return Ok(0);
        };

        let valid: Vec<SectionConfig> = stored
            .into_iter()
            .filter(|cfg| match validate(cfg) {
                Ok(()) => true,
                Err(e) => {
                    warn!(section_id = %cfg.id, error = %e, "Skipping persisted section config");
                    false
                }
            })
            .collect();
        let count = valid.len();
        *self.configs.write().await = valid;
        info!(sections = count, "Loaded section configuration");
        Ok(count)
    }

    /// All sections in catalogue order
    pub async fn list(&self) -> Vec<SectionConfig> {
        self.configs.read().await.clone()
    }

    /// Enabled sections, highest priority first
    pub async fn enabled(&self) -> Vec<SectionConfig> {
        let mut enabled: Vec<SectionConfig> = self
            .configs
            .read()
            .await
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .collect();
        enabled.sort_by(|a, b| b.priority.cmp(&a.priority));
        enabled
    }

    pub async fn get(&self, id: &str) -> Result<SectionConfig> {
        self.configs
            .read()
            .await
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| ServiceError::SectionNotFound(id.to_string()))
    }

    pub async fn update(&self, id: &str, patch: SectionConfigPatch) -> Result<SectionConfig> {
        let mut configs = self.configs.write().await;
        let index = configs
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| ServiceError::SectionNotFound(id.to_string()))?;

        let mut updated = configs[index].clone();
        if let Some(title) = patch.title {
            updated.title = title;
        }
        if let Some(subtitle) = patch.subtitle {
            updated.subtitle = subtitle;
        }
        if let Some(priority) = patch.priority {
            updated.priority = priority;
        }
        if let Some(min) = patch.min_screens {
            updated.min_screens = min;
        }
        if let Some(max) = patch.max_screens {
            updated.max_screens = max;
        }
        if let Some(interval) = patch.refresh_interval_secs {
            updated.refresh_interval_secs = interval;
        }
        if let Some(enabled) = patch.enabled {
            updated.enabled = enabled;
        }
        if let Some(conditions) = patch.conditions {
            updated.conditions = conditions;
        }
        if let Some(display) = patch.display {
            updated.display = display;
        }
        validate(&updated)?;

        // Only goes live once the store accepted it
        let mut next = configs.clone();
        next[index] = updated.clone();
        self.persist(&next).await?;
        *configs = next;
        info!(section_id = %id, "Updated section config");
        Ok(updated)
    }

    pub async fn toggle(&self, id: &str, enabled: bool) -> Result<SectionConfig> {
        self.update(
            id,
            SectionConfigPatch {
                enabled: Some(enabled),
                ..Default::default()
            },
        )
        .await
    }

    async fn persist(&self, configs: &[SectionConfig]) -> Result<()> {
        self.cache
            .set(&CacheKey::section_configs(), &configs, None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use marketplace_cache::{CacheError, CacheResult, KeyValueStore, MemoryStore};
    use std::collections::HashSet;
    use std::sync::Arc;

    /// Store that serves reads but rejects every write
    struct ReadOnlyStore;

    #[async_trait]
    impl KeyValueStore for ReadOnlyStore {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> CacheResult<()> {
            Err(CacheError::Unavailable("read-only replica".to_string()))
        }

        async fn del(&self, _key: &str) -> CacheResult<()> {
            Ok(())
        }

        async fn scan_del(&self, _prefix: &str) -> CacheResult<usize> {
            Ok(0)
        }

        async fn clear(&self) -> CacheResult<()> {
            Ok(())
        }
    }

    fn manager() -> (SectionConfigManager, TypedCache) {
        let cache = TypedCache::new(Arc::new(MemoryStore::new()));
        (SectionConfigManager::new(cache.clone()), cache)
    }

    #[test]
    fn test_default_catalogue_covers_every_algorithm() {
        let sections = default_sections();
        assert_eq!(sections.len(), 9);
        let algorithms: HashSet<_> = sections.iter().map(|s| s.algorithm).collect();
        assert_eq!(algorithms.len(), AlgorithmType::ALL.len());
        assert!(sections.iter().all(|s| validate(s).is_ok()));
    }

    #[tokio::test]
    async fn test_enabled_sorted_by_priority() {
        let (manager, _) = manager();
        let enabled = manager.enabled().await;
        assert!(enabled.windows(2).all(|w| w[0].priority >= w[1].priority));
    }

    #[tokio::test]
    async fn test_toggle_persists_and_reloads() {
        let (manager, cache) = manager();
        manager.toggle("trending", false).await.unwrap();
        assert!(manager.enabled().await.iter().all(|s| s.id != "trending"));

        let restored = SectionConfigManager::new(cache);
        assert_eq!(restored.load().await.unwrap(), 9);
        assert!(!restored.get("trending").await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_update_rejects_min_above_max() {
        let (manager, _) = manager();
        let result = manager
            .update(
                "popular",
                SectionConfigPatch {
                    min_screens: Some(20),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidConfig(_))));
        // Unchanged after rejection
        assert_eq!(manager.get("popular").await.unwrap().min_screens, 4);
    }

    #[tokio::test]
    async fn test_unknown_section() {
        let (manager, _) = manager();
        assert!(matches!(
            manager.toggle("missing", true).await,
            Err(ServiceError::SectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_applies_patch() {
        let (manager, _) = manager();
        let updated = manager
            .update(
                "near-you",
                SectionConfigPatch {
                    title: Some("Around the Corner".to_string()),
                    subtitle: Some(None),
                    priority: Some(99),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Around the Corner");
        assert_eq!(updated.subtitle, None);
        assert_eq!(manager.enabled().await[1].id, "near-you");
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_config_unchanged() {
        let manager = SectionConfigManager::new(TypedCache::new(Arc::new(ReadOnlyStore)));

        let result = manager.toggle("trending", false).await;
        assert!(matches!(result, Err(ServiceError::Storage(_))));
        assert!(manager.get("trending").await.unwrap().enabled);
        assert!(manager.enabled().await.iter().any(|s| s.id == "trending"));
    }
}
