use crate::services::behavior::BehaviorStoreConfig;
use crate::services::grouping::{FallbackStrategy, GroupingConfig};
use crate::services::market_data::MarketDataConfig;
use crate::services::preference::AnalyzerConfig;
use chrono::Duration;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Redis,
}

/// Service configuration, read from `MARKETPLACE_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub storage_backend: StorageBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// JSON array of raw screens; a built-in demo catalog is used when unset
    #[serde(default)]
    pub catalog_path: Option<String>,
    #[serde(default = "default_sections_cache_ttl_secs")]
    pub sections_cache_ttl_secs: i64,
    #[serde(default = "default_insights_ttl_secs")]
    pub insights_ttl_secs: i64,
    #[serde(default = "default_market_data_ttl_secs")]
    pub market_data_ttl_secs: i64,
    #[serde(default = "default_min_interactions")]
    pub min_interactions: u32,
    #[serde(default)]
    pub fallback_strategy: FallbackStrategy,
    #[serde(default = "default_max_sections")]
    pub max_sections: usize,
    #[serde(default = "default_max_interactions_per_user")]
    pub max_interactions_per_user: usize,
    #[serde(default = "default_trending_window_days")]
    pub trending_window_days: u32,
}

fn default_service_name() -> String {
    "marketplace-service".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_sections_cache_ttl_secs() -> i64 {
    1800
}

fn default_insights_ttl_secs() -> i64 {
    3600
}

fn default_market_data_ttl_secs() -> i64 {
    300
}

fn default_min_interactions() -> u32 {
    10
}

fn default_max_sections() -> usize {
    8
}

fn default_max_interactions_per_user() -> usize {
    1000
}

fn default_trending_window_days() -> u32 {
    7
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            storage_backend: StorageBackend::default(),
            redis_url: default_redis_url(),
            catalog_path: None,
            sections_cache_ttl_secs: default_sections_cache_ttl_secs(),
            insights_ttl_secs: default_insights_ttl_secs(),
            market_data_ttl_secs: default_market_data_ttl_secs(),
            min_interactions: default_min_interactions(),
            fallback_strategy: FallbackStrategy::default(),
            max_sections: default_max_sections(),
            max_interactions_per_user: default_max_interactions_per_user(),
            trending_window_days: default_trending_window_days(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config: Config = envy::prefixed("MARKETPLACE_").from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sections_cache_ttl_secs <= 0 {
            return Err(ConfigError::Invalid(
                "MARKETPLACE_SECTIONS_CACHE_TTL_SECS must be positive".to_string(),
            ));
        }
        if self.max_sections == 0 {
            return Err(ConfigError::Invalid(
                "MARKETPLACE_MAX_SECTIONS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn grouping(&self) -> GroupingConfig {
        GroupingConfig {
            cache_ttl: Duration::seconds(self.sections_cache_ttl_secs),
            fallback_strategy: self.fallback_strategy,
            max_sections: self.max_sections,
            ..GroupingConfig::default()
        }
    }

    pub fn analyzer(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            min_interactions: self.min_interactions,
            cache_ttl: Duration::seconds(self.insights_ttl_secs),
            ..AnalyzerConfig::default()
        }
    }

    pub fn behavior(&self) -> BehaviorStoreConfig {
        BehaviorStoreConfig {
            max_interactions_per_user: self.max_interactions_per_user,
            ..BehaviorStoreConfig::default()
        }
    }

    pub fn market(&self) -> MarketDataConfig {
        MarketDataConfig {
            cache_ttl: Duration::seconds(self.market_data_ttl_secs),
            trending_window_days: self.trending_window_days,
            ..MarketDataConfig::default()
        }
    }
}
