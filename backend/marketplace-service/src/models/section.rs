use super::{EnhancedScreen, ScreenCategory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Strategy used to produce a section's candidate screens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmType {
    MlPersonalized,
    CollaborativeFiltering,
    ContentBased,
    TrendingAnalysis,
    GeographicProximity,
    PerformanceBased,
    NewDiscovery,
    RecentlyViewed,
    FallbackPopular,
}

impl AlgorithmType {
    pub const ALL: [AlgorithmType; 9] = [
        AlgorithmType::MlPersonalized,
        AlgorithmType::CollaborativeFiltering,
        AlgorithmType::ContentBased,
        AlgorithmType::TrendingAnalysis,
        AlgorithmType::GeographicProximity,
        AlgorithmType::PerformanceBased,
        AlgorithmType::NewDiscovery,
        AlgorithmType::RecentlyViewed,
        AlgorithmType::FallbackPopular,
    ];

    /// Static trust ranking of each strategy
    pub fn weight(&self) -> f64 {
        match self {
            AlgorithmType::MlPersonalized => 1.0,
            AlgorithmType::CollaborativeFiltering => 0.95,
            AlgorithmType::ContentBased => 0.9,
            AlgorithmType::PerformanceBased => 0.85,
            AlgorithmType::TrendingAnalysis => 0.85,
            AlgorithmType::GeographicProximity => 0.8,
            AlgorithmType::RecentlyViewed => 0.75,
            AlgorithmType::NewDiscovery => 0.7,
            AlgorithmType::FallbackPopular => 0.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmType::MlPersonalized => "ml-personalized",
            AlgorithmType::CollaborativeFiltering => "collaborative-filtering",
            AlgorithmType::ContentBased => "content-based",
            AlgorithmType::TrendingAnalysis => "trending-analysis",
            AlgorithmType::GeographicProximity => "geographic-proximity",
            AlgorithmType::PerformanceBased => "performance-based",
            AlgorithmType::NewDiscovery => "new-discovery",
            AlgorithmType::RecentlyViewed => "recently-viewed",
            AlgorithmType::FallbackPopular => "fallback-popular",
        }
    }

    /// Whether the strategy depends on a user's history
    pub fn is_personalized(&self) -> bool {
        matches!(
            self,
            AlgorithmType::MlPersonalized
                | AlgorithmType::CollaborativeFiltering
                | AlgorithmType::ContentBased
                | AlgorithmType::RecentlyViewed
        )
    }
}

impl fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayType {
    Carousel,
    Grid,
    List,
    Featured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardSize {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub layout: DisplayType,
    pub show_scores: bool,
    pub card_size: CardSize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            layout: DisplayType::Carousel,
            show_scores: false,
            card_size: CardSize::Medium,
        }
    }
}

/// Preconditions a user must satisfy before a section is generated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionConditions {
    pub requires_login: bool,
    pub min_interactions: u32,
    pub min_purchases: u32,
    pub requires_location: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionConfig {
    pub id: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub algorithm: AlgorithmType,
    /// Higher is more important
    pub priority: i32,
    pub min_screens: usize,
    pub max_screens: usize,
    pub refresh_interval_secs: u64,
    pub enabled: bool,
    pub conditions: SectionConditions,
    pub display: DisplayConfig,
}

impl SectionConfig {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        algorithm: AlgorithmType,
        priority: i32,
        min_screens: usize,
        max_screens: usize,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            subtitle: None,
            algorithm,
            priority,
            min_screens,
            max_screens,
            refresh_interval_secs: 1800,
            enabled: true,
            conditions: SectionConditions::default(),
            display: DisplayConfig::default(),
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn with_conditions(mut self, conditions: SectionConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_layout(mut self, layout: DisplayType) -> Self {
        self.display.layout = layout;
        self
    }
}

/// Partial update accepted by the configuration manager
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionConfigPatch {
    pub title: Option<String>,
    pub subtitle: Option<Option<String>>,
    pub priority: Option<i32>,
    pub min_screens: Option<usize>,
    pub max_screens: Option<usize>,
    pub refresh_interval_secs: Option<u64>,
    pub enabled: Option<bool>,
    pub conditions: Option<SectionConditions>,
    pub display: Option<DisplayConfig>,
}

/// Minimal view of the user a section was generated for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContextSnapshot {
    pub user_id: String,
    pub interaction_count: u32,
    pub top_categories: Vec<ScreenCategory>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionMetadata {
    pub algorithm: AlgorithmType,
    /// [0, 1]
    pub confidence: f64,
    pub generated_at: DateTime<Utc>,
    pub tracking_id: Uuid,
    pub user_context: Option<UserContextSnapshot>,
}

/// Output unit of a generation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketplaceSection {
    pub id: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub screens: Vec<EnhancedScreen>,
    pub display_type: DisplayType,
    pub priority: i32,
    pub metadata: SectionMetadata,
}

impl MarketplaceSection {
    pub fn from_config(
        config: &SectionConfig,
        screens: Vec<EnhancedScreen>,
        confidence: f64,
        generated_at: DateTime<Utc>,
        user_context: Option<UserContextSnapshot>,
    ) -> Self {
        Self {
            id: config.id.clone(),
            title: config.title.clone(),
            subtitle: config.subtitle.clone(),
            screens,
            display_type: config.display.layout,
            priority: config.priority,
            metadata: SectionMetadata {
                algorithm: config.algorithm,
                confidence: confidence.clamp(0.0, 1.0),
                generated_at,
                tracking_id: Uuid::new_v4(),
                user_context,
            },
        }
    }

    pub fn algorithm(&self) -> AlgorithmType {
        self.metadata.algorithm
    }

    pub fn contains(&self, screen_id: &str) -> bool {
        self.screens.iter().any(|s| s.id() == screen_id)
    }
}
