// ============================================
// Grouping Orchestrator (區塊編排)
// ============================================
//
// CacheCheck -> CacheHit
//            -> PerSectionGeneration -> Deduplicating -> Backfilling
//               -> Balancing -> Cached | FallbackApplied
//
// Deduplication runs first and is authoritative. Balancing only moves
// screens inside the deduplicated layout, so a screen never lands in two
// sections. `generate_sections` never returns an error; failures are
// reported in `GenerationResult::errors`.

use crate::error::{ErrorCode, PipelineError, Result};
use crate::metrics;
use crate::models::{
    AlgorithmType, DisplayType, EnhancedScreen, MarketplaceSection, Screen, ScreenFilters,
    SectionConfig, SectionConfigPatch, UserContextSnapshot,
};
use crate::services::catalog::CatalogProvider;
use crate::services::dedup::DeduplicationEngine;
use crate::services::engagement::{EngagementTracker, SectionEngagementEvent};
use crate::services::priority::{ScoringContext, SectionPriorityEngine, SectionSlot};
use crate::services::recommendation::{
    GeneratorRegistry, RecommendationService, SectionRequest, UserSignals,
};
use crate::services::section_config::{default_sections, SectionConfigManager};
use chrono::{DateTime, Duration, Utc};
use marketplace_cache::{ttl, CacheKey, Clock, TypedCache};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What to serve when a cycle produces no sections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackStrategy {
    /// Top-rated screens in a single section
    #[default]
    Popular,
    /// The user's recently viewed screens
    Recent,
    /// Last successful result for the user
    Cached,
    /// Regenerate with the built-in section catalogue
    DefaultConfiguration,
}

#[derive(Debug, Clone)]
pub struct GroupingConfig {
    pub cache_ttl: Duration,
    /// Lifetime of the last-known-good snapshot
    pub snapshot_ttl: Duration,
    pub fallback_strategy: FallbackStrategy,
    pub max_sections: usize,
    /// Screens in a generated fallback section
    pub fallback_size: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            cache_ttl: ttl::sections(),
            snapshot_ttl: ttl::snapshot(),
            fallback_strategy: FallbackStrategy::Popular,
            max_sections: 8,
            fallback_size: 12,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub user_id: Option<String>,
    pub filters: ScreenFilters,
    pub location: Option<String>,
    /// Bypass the cache and overwrite it on completion
    pub force_refresh: bool,
}

impl GenerationOptions {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_filters(mut self, filters: ScreenFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    /// Trimmed location, `None` when blank
    pub fn location(&self) -> Option<&str> {
        self.location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }

    /// Identifies every input that shapes the generated sections besides the user
    pub fn cache_fingerprint(&self) -> String {
        let filters = self.filters.fingerprint();
        match self.location() {
            Some(location) => {
                let digest = Sha256::digest(location.to_lowercase().as_bytes());
                format!("{}:{}", filters, hex::encode(&digest[..6]))
            }
            None => filters,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStage {
    CacheCheck,
    CacheHit,
    PerSectionGeneration,
    Deduplicating,
    Backfilling,
    Balancing,
    Cached,
    FallbackApplied,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationAnalytics {
    pub user_id: Option<String>,
    pub personalized: bool,
    pub sections_considered: usize,
    pub sections_generated: usize,
    pub sections_returned: usize,
    pub total_screens: usize,
    pub duplicates_removed: usize,
    pub backfilled: usize,
    pub conflicts: usize,
    pub balance_score: f64,
    pub average_confidence: f64,
    pub stages: Vec<PipelineStage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub sections: Vec<MarketplaceSection>,
    pub analytics: GenerationAnalytics,
    pub fallback_used: bool,
    pub processing_time_ms: u64,
    pub cache_hit: bool,
    pub errors: Vec<PipelineError>,
}

/// Per-cycle bookkeeping
struct Cycle {
    user_id: Option<String>,
    stages: Vec<PipelineStage>,
    errors: Vec<PipelineError>,
}

impl Cycle {
    fn new(user_id: Option<&str>) -> Self {
        Self {
            user_id: user_id.map(str::to_string),
            stages: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn enter(&mut self, stage: PipelineStage) {
        debug!(user_id = ?self.user_id, stage = ?stage, "Pipeline stage");
        self.stages.push(stage);
    }

    fn fail(
        &mut self,
        code: ErrorCode,
        message: impl Into<String>,
        context: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.errors.push(PipelineError::new(
            code,
            message,
            context,
            self.user_id.as_deref(),
            now,
        ));
    }

    fn has(&self, code: ErrorCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }
}

#[derive(Debug, Default)]
struct AssemblyStats {
    generated: usize,
    duplicates_removed: usize,
    backfilled: usize,
    conflicts: usize,
    balance_score: f64,
}

pub struct GroupingService {
    catalog: Arc<dyn CatalogProvider>,
    recommendation: Arc<RecommendationService>,
    registry: GeneratorRegistry,
    priority: Arc<SectionPriorityEngine>,
    dedup: DeduplicationEngine,
    section_config: Arc<SectionConfigManager>,
    engagement: Arc<EngagementTracker>,
    cache: TypedCache,
    clock: Arc<dyn Clock>,
    config: GroupingConfig,
}

impl GroupingService {
    pub fn new(
        catalog: Arc<dyn CatalogProvider>,
        recommendation: Arc<RecommendationService>,
        cache: TypedCache,
        clock: Arc<dyn Clock>,
        config: GroupingConfig,
    ) -> Self {
        let priority = Arc::new(SectionPriorityEngine::default());
        Self {
            registry: GeneratorRegistry::builtin(recommendation.clone()),
            dedup: DeduplicationEngine::new(priority.clone()),
            priority,
            section_config: Arc::new(SectionConfigManager::new(cache.clone())),
            engagement: Arc::new(EngagementTracker::new(cache.clone())),
            catalog,
            recommendation,
            cache,
            clock,
            config,
        }
    }

    /// Replace the generator set, e.g. to plug in a trained model
    pub fn with_registry(mut self, registry: GeneratorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_section_config(mut self, manager: Arc<SectionConfigManager>) -> Self {
        self.section_config = manager;
        self
    }

    pub fn section_config(&self) -> &Arc<SectionConfigManager> {
        &self.section_config
    }

    pub fn engagement(&self) -> &Arc<EngagementTracker> {
        &self.engagement
    }

    pub fn config(&self) -> &GroupingConfig {
        &self.config
    }

    pub async fn generate_sections(&self, options: GenerationOptions) -> GenerationResult {
        let started = Instant::now();
        let user_id = options.user_id.as_deref();
        let key = CacheKey::sections(user_id, &options.cache_fingerprint());
        let mut cycle = Cycle::new(user_id);

        cycle.enter(PipelineStage::CacheCheck);
        if !options.force_refresh {
            match self.cache.get::<GenerationResult>(&key).await {
                Ok(Some(mut cached)) => {
                    cycle.enter(PipelineStage::CacheHit);
                    debug!(user_id = ?user_id, sections = cached.sections.len(), "Sections cache hit");
                    cached.cache_hit = true;
                    cached.processing_time_ms = started.elapsed().as_millis() as u64;
                    metrics::observe_generation("cache_hit", started.elapsed());
                    return cached;
                }
                Ok(None) => debug!(user_id = ?user_id, "Sections cache miss"),
                Err(e) => warn!(user_id = ?user_id, error = %e, "Sections cache read failed"),
            }
        }

        let now = self.clock.now();
        let signals = self.recommendation.signals(user_id).await;
        let configs = self.section_config.enabled().await;
        let location = options.location();

        let pool: Vec<Screen> = match self.catalog.list_screens().await {
            Ok(screens) => screens
                .into_iter()
                .filter(|s| options.filters.matches(s))
                .collect(),
            Err(e) => {
                warn!(user_id = ?user_id, error = %e, "Catalog unavailable");
                cycle.fail(ErrorCode::GenerationFailed, e.to_string(), "catalog", now);
                Vec::new()
            }
        };

        let (mut sections, stats) = if pool.is_empty() {
            (Vec::new(), AssemblyStats::default())
        } else {
            self.assemble(&configs, &signals, &pool, location, &mut cycle)
                .await
        };

        let fallback_used = sections.is_empty();
        if fallback_used {
            if !cycle.has(ErrorCode::GenerationFailed) {
                cycle.fail(
                    ErrorCode::GenerationFailed,
                    "no section satisfied its minimum size",
                    "generate_sections",
                    now,
                );
            }
            sections = self
                .apply_fallback(&signals, &pool, location, &mut cycle)
                .await;
        } else {
            cycle.enter(PipelineStage::Cached);
        }

        let total_screens = sections.iter().map(|s| s.screens.len()).sum();
        let average_confidence = if sections.is_empty() {
            0.0
        } else {
            sections.iter().map(|s| s.metadata.confidence).sum::<f64>() / sections.len() as f64
        };

        let result = GenerationResult {
            analytics: GenerationAnalytics {
                user_id: options.user_id.clone(),
                personalized: signals.is_personalized(),
                sections_considered: configs.len(),
                sections_generated: stats.generated,
                sections_returned: sections.len(),
                total_screens,
                duplicates_removed: stats.duplicates_removed,
                backfilled: stats.backfilled,
                conflicts: stats.conflicts,
                balance_score: stats.balance_score,
                average_confidence,
                stages: cycle.stages,
            },
            sections,
            fallback_used,
            processing_time_ms: started.elapsed().as_millis() as u64,
            cache_hit: false,
            errors: cycle.errors,
        };

        if fallback_used {
            metrics::observe_generation("fallback", started.elapsed());
        } else {
            self.store(&key, user_id, &result).await;
            metrics::observe_generation("generated", started.elapsed());
        }

        info!(
            user_id = ?user_id,
            sections = result.sections.len(),
            screens = total_screens,
            fallback_used,
            errors = result.errors.len(),
            elapsed_ms = result.processing_time_ms,
            "Generated marketplace sections"
        );
        result
    }

    /// Generate, deduplicate, backfill and balance one set of section configs
    async fn assemble(
        &self,
        configs: &[SectionConfig],
        signals: &UserSignals,
        pool: &[Screen],
        location: Option<&str>,
        cycle: &mut Cycle,
    ) -> (Vec<MarketplaceSection>, AssemblyStats) {
        let now = self.clock.now();
        let mut stats = AssemblyStats::default();
        let user_context = signals.user_id.as_ref().map(|id| UserContextSnapshot {
            user_id: id.clone(),
            interaction_count: signals.interaction_count(),
            top_categories: signals.profile.top_categories(3),
            location: location
                .map(str::to_string)
                .or_else(|| signals.profile.top_location().map(|l| l.city.clone())),
        });

        cycle.enter(PipelineStage::PerSectionGeneration);
        let mut sections = Vec::new();
        let mut slots = Vec::new();

        for config in configs {
            if !conditions_met(config, signals, location) {
                debug!(section_id = %config.id, "Section conditions not met");
                continue;
            }
            let Some(generator) = self.registry.get(config.algorithm) else {
                cycle.fail(
                    ErrorCode::SectionGenerationFailed,
                    format!("no generator registered for {}", config.algorithm),
                    format!("section:{}", config.id),
                    now,
                );
                metrics::record_section_failure(config.algorithm.as_str());
                continue;
            };

            let request = SectionRequest {
                config,
                signals,
                pool,
                location,
            };
            match generator.generate(&request).await {
                Ok(mut generated) => {
                    generated.screens.truncate(config.max_screens);
                    if generated.screens.is_empty() || generated.screens.len() < config.min_screens {
                        debug!(
                            section_id = %config.id,
                            screens = generated.screens.len(),
                            min = config.min_screens,
                            "Dropping section below minimum"
                        );
                        continue;
                    }
                    slots.push(SectionSlot::new(config.clone(), generated.confidence));
                    sections.push(MarketplaceSection::from_config(
                        config,
                        generated.screens,
                        generated.confidence,
                        now,
                        user_context.clone(),
                    ));
                }
                Err(e) => {
                    warn!(section_id = %config.id, error = %e, "Section generation failed");
                    cycle.fail(
                        ErrorCode::SectionGenerationFailed,
                        e.to_string(),
                        format!("section:{}", config.id),
                        now,
                    );
                    metrics::record_section_failure(config.algorithm.as_str());
                }
            }
        }

        stats.generated = sections.len();
        if sections.is_empty() {
            return (sections, stats);
        }

        let ctx = ScoringContext {
            profile: signals.profile.clone(),
            location: location.map(str::to_string),
            now,
        };

        cycle.enter(PipelineStage::Deduplicating);
        let sections = match self.dedup.remove_duplicates(sections) {
            Ok(outcome) => {
                stats.duplicates_removed = outcome
                    .removals
                    .iter()
                    .map(|r| r.removed_from.len())
                    .sum();
                outcome.sections
            }
            Err(e) => {
                warn!(error = %e, "Deduplication failed");
                cycle.fail(ErrorCode::DeduplicationFailed, e.to_string(), "deduplication", now);
                return (Vec::new(), stats);
            }
        };

        cycle.enter(PipelineStage::Backfilling);
        let catalog = self.recommendation.popular(signals, pool, pool.len()).await;
        let backfill = self.dedup.backfill_sections(sections, &catalog, &slots, &ctx);
        stats.backfilled = backfill.added.values().sum();

        cycle.enter(PipelineStage::Balancing);
        let mut assignment = self.priority.evaluate_sections(&backfill.sections, &slots, &ctx);
        self.priority.handle_edge_cases(&mut assignment, &slots);
        stats.conflicts = assignment.conflicts.len();
        stats.balance_score = assignment.balance.balance_score;

        // Rebuild from the balanced layout; each screen is taken at most once
        let mut by_id: HashMap<String, EnhancedScreen> = backfill
            .sections
            .iter()
            .flat_map(|s| s.screens.iter())
            .map(|e| (e.id().to_string(), e.clone()))
            .collect();
        let mut sections = backfill.sections;
        for section in &mut sections {
            section.screens = assignment
                .assignments
                .get(&section.id)
                .map(|ids| ids.iter().filter_map(|id| by_id.remove(id)).collect())
                .unwrap_or_default();
        }

        let minimums: HashMap<&str, usize> = slots
            .iter()
            .map(|s| (s.id(), s.config.min_screens))
            .collect();
        sections.retain(|s| {
            let min = minimums.get(s.id.as_str()).copied().unwrap_or(0);
            !s.screens.is_empty() && s.screens.len() >= min
        });
        sections.sort_by(|a, b| b.priority.cmp(&a.priority));
        sections.truncate(self.config.max_sections);

        (sections, stats)
    }

    async fn apply_fallback(
        &self,
        signals: &UserSignals,
        pool: &[Screen],
        location: Option<&str>,
        cycle: &mut Cycle,
    ) -> Vec<MarketplaceSection> {
        cycle.enter(PipelineStage::FallbackApplied);
        let strategy = self.config.fallback_strategy;
        warn!(user_id = ?signals.user_id, strategy = ?strategy, "Applying fallback strategy");

        let mut sections = match strategy {
            FallbackStrategy::Popular => self.popular_fallback(signals, pool).await,
            FallbackStrategy::Recent => self.recent_fallback(signals, pool).await,
            FallbackStrategy::Cached => self.snapshot(signals.user_id.as_deref()).await,
            FallbackStrategy::DefaultConfiguration => {
                self.assemble(&default_sections(), signals, pool, location, cycle)
                    .await
                    .0
            }
        };

        if sections.is_empty() && strategy != FallbackStrategy::Popular {
            sections = self.popular_fallback(signals, pool).await;
        }
        if sections.is_empty() && strategy != FallbackStrategy::Cached {
            sections = self.snapshot(signals.user_id.as_deref()).await;
        }
        sections
    }

    async fn popular_fallback(&self, signals: &UserSignals, pool: &[Screen]) -> Vec<MarketplaceSection> {
        let screens = self
            .recommendation
            .fallback(signals, pool, self.config.fallback_size)
            .await;
        let config = SectionConfig::new(
            "popular",
            "Popular Screens",
            AlgorithmType::FallbackPopular,
            50,
            1,
            self.config.fallback_size,
        )
        .with_layout(DisplayType::Grid);
        self.single_section(&config, screens, 0.5)
    }

    async fn recent_fallback(&self, signals: &UserSignals, pool: &[Screen]) -> Vec<MarketplaceSection> {
        let screens = self
            .recommendation
            .recently_viewed(signals, pool, self.config.fallback_size)
            .await;
        let config = SectionConfig::new(
            "recently-viewed",
            "Recently Viewed",
            AlgorithmType::RecentlyViewed,
            95,
            1,
            self.config.fallback_size,
        );
        self.single_section(&config, screens, 0.9)
    }

    fn single_section(
        &self,
        config: &SectionConfig,
        screens: Vec<EnhancedScreen>,
        confidence: f64,
    ) -> Vec<MarketplaceSection> {
        if screens.is_empty() {
            return Vec::new();
        }
        vec![MarketplaceSection::from_config(
            config,
            screens,
            confidence,
            self.clock.now(),
            None,
        )]
    }

    async fn snapshot(&self, user_id: Option<&str>) -> Vec<MarketplaceSection> {
        match self
            .cache
            .get::<Vec<MarketplaceSection>>(&CacheKey::sections_snapshot(user_id))
            .await
        {
            Ok(sections) => sections.unwrap_or_default(),
            Err(e) => {
                warn!(user_id = ?user_id, error = %e, "Snapshot read failed");
                Vec::new()
            }
        }
    }

    async fn store(&self, key: &str, user_id: Option<&str>, result: &GenerationResult) {
        if let Err(e) = self
            .cache
            .set(key, result, Some(self.config.cache_ttl))
            .await
        {
            warn!(user_id = ?user_id, error = %e, "Sections cache write failed");
        }
        if let Err(e) = self
            .cache
            .set(
                &CacheKey::sections_snapshot(user_id),
                &result.sections,
                Some(self.config.snapshot_ttl),
            )
            .await
        {
            warn!(user_id = ?user_id, error = %e, "Snapshot write failed");
        }
    }

    pub async fn track_section_engagement(&self, event: SectionEngagementEvent) -> Result<()> {
        self.engagement.track(event).await
    }

    pub async fn update_section_config(
        &self,
        section_id: &str,
        patch: SectionConfigPatch,
    ) -> Result<SectionConfig> {
        let updated = self.section_config.update(section_id, patch).await?;
        self.invalidate_all().await;
        Ok(updated)
    }

    pub async fn toggle_section(&self, section_id: &str, enabled: bool) -> Result<SectionConfig> {
        let updated = self.section_config.toggle(section_id, enabled).await?;
        self.invalidate_all().await;
        Ok(updated)
    }

    /// Drop the user's cached sections and insights, then regenerate
    pub async fn refresh_sections(&self, user_id: Option<&str>) -> GenerationResult {
        let now = self.clock.now();
        let mut refresh_errors = Vec::new();

        if let Err(e) = self.cache.scan_del(&CacheKey::sections_prefix(user_id)).await {
            warn!(user_id = ?user_id, error = %e, "Failed to invalidate cached sections");
            refresh_errors.push(PipelineError::new(
                ErrorCode::RefreshFailed,
                e.to_string(),
                "refresh_sections",
                user_id,
                now,
            ));
        }
        if let Some(id) = user_id {
            self.recommendation.invalidate_user(id).await;
        }

        let mut result = self
            .generate_sections(GenerationOptions {
                user_id: user_id.map(str::to_string),
                force_refresh: true,
                ..Default::default()
            })
            .await;

        if result.fallback_used {
            refresh_errors.push(PipelineError::new(
                ErrorCode::RefreshFailed,
                "refresh produced fallback sections",
                "refresh_sections",
                user_id,
                now,
            ));
        }
        result.errors.extend(refresh_errors);
        result
    }

    async fn invalidate_all(&self) {
        match self.cache.scan_del(&CacheKey::sections_root()).await {
            Ok(removed) => info!(removed, "Invalidated cached sections"),
            Err(e) => warn!(error = %e, "Failed to invalidate cached sections"),
        }
    }
}

fn conditions_met(config: &SectionConfig, signals: &UserSignals, location: Option<&str>) -> bool {
    let conditions = &config.conditions;
    if conditions.requires_login && signals.user_id.is_none() {
        return false;
    }
    if signals.interaction_count() < conditions.min_interactions {
        return false;
    }
    if signals.profile.purchases.total_purchases < conditions.min_purchases {
        return false;
    }
    if conditions.requires_location
        && location.is_none()
        && signals.profile.top_location().is_none()
    {
        return false;
    }
    true
}
