use super::{RecommendationService, UserSignals};
use crate::error::Result;
use crate::models::{AlgorithmType, EnhancedScreen, Screen, SectionConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Input for generating one section's candidates
pub struct SectionRequest<'a> {
    pub config: &'a SectionConfig,
    pub signals: &'a UserSignals,
    /// Filtered catalog for this cycle
    pub pool: &'a [Screen],
    pub location: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct GeneratedSection {
    pub screens: Vec<EnhancedScreen>,
    pub confidence: f64,
}

/// Candidate producer for one algorithm type
#[async_trait]
pub trait SectionGenerator: Send + Sync {
    fn algorithm(&self) -> AlgorithmType;
    async fn generate(&self, request: &SectionRequest<'_>) -> Result<GeneratedSection>;
}

/// Built-in generator backed by the recommendation service
pub struct AlgorithmGenerator {
    algorithm: AlgorithmType,
    service: Arc<RecommendationService>,
}

impl AlgorithmGenerator {
    pub fn new(algorithm: AlgorithmType, service: Arc<RecommendationService>) -> Self {
        Self { algorithm, service }
    }

    fn confidence(&self, signals: &UserSignals) -> f64 {
        let insight = signals.insights.confidence;
        let personalized = signals.is_personalized();
        let confidence = match self.algorithm {
            AlgorithmType::MlPersonalized if personalized => 0.5 + 0.5 * insight,
            AlgorithmType::MlPersonalized => 0.3,
            AlgorithmType::CollaborativeFiltering if personalized => 0.4 + 0.5 * insight,
            AlgorithmType::CollaborativeFiltering => 0.25,
            AlgorithmType::ContentBased => 0.4 + 0.4 * insight,
            AlgorithmType::RecentlyViewed => 0.9,
            AlgorithmType::TrendingAnalysis => 0.75,
            AlgorithmType::PerformanceBased => 0.7,
            AlgorithmType::GeographicProximity => 0.65,
            AlgorithmType::NewDiscovery => 0.55,
            AlgorithmType::FallbackPopular => 0.5,
        };
        confidence.clamp(0.0, 1.0)
    }
}

#[async_trait]
impl SectionGenerator for AlgorithmGenerator {
    fn algorithm(&self) -> AlgorithmType {
        self.algorithm
    }

    async fn generate(&self, request: &SectionRequest<'_>) -> Result<GeneratedSection> {
        let signals = request.signals;
        let pool = request.pool;
        let limit = request.config.max_screens;
        let service = &self.service;

        let screens = match self.algorithm {
            AlgorithmType::MlPersonalized => service.top_picks(signals, pool, limit).await,
            AlgorithmType::CollaborativeFiltering => {
                service.collaborative(signals, pool, limit).await
            }
            AlgorithmType::ContentBased => match signals.profile.recent_screens.first() {
                Some(anchor) => {
                    service
                        .similar_screens(signals, &anchor.screen_id, pool, limit)
                        .await
                }
                None => Vec::new(),
            },
            AlgorithmType::TrendingAnalysis => {
                service.trending(signals, request.location, pool, limit).await
            }
            AlgorithmType::GeographicProximity => {
                service.geographic(signals, request.location, pool, limit).await
            }
            AlgorithmType::PerformanceBased => {
                service.performance_based(signals, pool, limit).await
            }
            AlgorithmType::NewDiscovery => service.new_discoveries(signals, pool, limit).await,
            AlgorithmType::RecentlyViewed => service.recently_viewed(signals, pool, limit).await,
            AlgorithmType::FallbackPopular => service.popular(signals, pool, limit).await,
        };

        Ok(GeneratedSection {
            screens,
            confidence: self.confidence(signals),
        })
    }
}

/// Generators keyed by algorithm type
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    generators: HashMap<AlgorithmType, Arc<dyn SectionGenerator>>,
}

impl GeneratorRegistry {
    /// One built-in generator per algorithm type
    pub fn builtin(service: Arc<RecommendationService>) -> Self {
        let mut registry = Self::default();
        for algorithm in AlgorithmType::ALL {
            registry.register(Arc::new(AlgorithmGenerator::new(algorithm, service.clone())));
        }
        registry
    }

    /// Replaces any generator already registered for the same algorithm
    pub fn register(&mut self, generator: Arc<dyn SectionGenerator>) {
        self.generators.insert(generator.algorithm(), generator);
    }

    pub fn get(&self, algorithm: AlgorithmType) -> Option<Arc<dyn SectionGenerator>> {
        self.generators.get(&algorithm).cloned()
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}
