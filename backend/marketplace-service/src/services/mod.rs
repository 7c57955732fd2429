pub mod behavior;
pub mod catalog;
pub mod dedup;
pub mod engagement;
pub mod grouping;
pub mod market_data;
pub mod preference;
pub mod priority;
pub mod recommendation;
pub mod section_config;

pub use behavior::UserBehaviorStore;
pub use catalog::{CatalogProvider, InMemoryCatalog};
pub use dedup::DeduplicationEngine;
pub use engagement::{EngagementAction, EngagementTracker, SectionEngagementEvent, SectionStats};
pub use grouping::{
    FallbackStrategy, GenerationOptions, GenerationResult, GroupingConfig, GroupingService,
};
pub use market_data::MarketDataProvider;
pub use preference::PreferenceAnalyzer;
pub use priority::SectionPriorityEngine;
pub use recommendation::RecommendationService;
pub use section_config::SectionConfigManager;

use crate::config::Config;
use marketplace_cache::{Clock, TypedCache};
use recommendation::RecommendationConfig;
use std::sync::Arc;

/// Fully wired pipeline over one store and clock
pub struct Pipeline {
    pub grouping: Arc<GroupingService>,
    pub behavior: Arc<UserBehaviorStore>,
    pub recommendation: Arc<RecommendationService>,
}

pub fn build_pipeline(
    catalog: Arc<dyn CatalogProvider>,
    cache: TypedCache,
    clock: Arc<dyn Clock>,
    config: &Config,
) -> Pipeline {
    let behavior = Arc::new(UserBehaviorStore::new(clock.clone(), config.behavior()));
    let analyzer = Arc::new(PreferenceAnalyzer::new(
        behavior.clone(),
        cache.clone(),
        clock.clone(),
        config.analyzer(),
    ));
    let market = Arc::new(MarketDataProvider::new(
        catalog.clone(),
        behavior.clone(),
        cache.clone(),
        clock.clone(),
        config.market(),
    ));
    let recommendation = Arc::new(RecommendationService::new(
        behavior.clone(),
        analyzer,
        market,
        clock.clone(),
        RecommendationConfig::default(),
    ));
    let grouping = Arc::new(GroupingService::new(
        catalog,
        recommendation.clone(),
        cache,
        clock,
        config.grouping(),
    ));

    Pipeline {
        grouping,
        behavior,
        recommendation,
    }
}
