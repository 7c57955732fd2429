// ============================================
// Recommendation Generator (推薦生成)
// ============================================
//
// One method per algorithm type. Every method:
// 1. Falls back to popularity ranking for anonymous users or thin history
// 2. Blends personal affinity (0.8) with popularity (0.2) once history exists
// 3. Never propagates internal failures; a deterministic fallback list
//    (top rated, then id order) is returned instead
//
// Similarity = category 0.4 + price within 30% 0.3 + same city 0.2
//            + rating within 0.5 0.1

mod generator;
mod scorer;

pub use generator::{
    AlgorithmGenerator, GeneratedSection, GeneratorRegistry, SectionGenerator, SectionRequest,
};
pub use scorer::{MarketTrendScorer, ProfileAffinityScorer, ScoringInput, ScreenScorer};

use crate::error::{Result, ServiceError};
use crate::models::{EnhancedScreen, PerformanceMetrics, Screen, UserProfile};
use crate::services::behavior::UserBehaviorStore;
use crate::services::market_data::MarketDataProvider;
use crate::services::preference::{PreferenceAnalyzer, PreferenceInsights};
use crate::utils::{desc, exponential_decay};
use chrono::Duration;
use marketplace_cache::Clock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RecommendationConfig {
    /// Weight of personal affinity once the user has enough history
    pub personalization_weight: f64,
    /// Screens younger than this count as new inventory
    pub new_discovery_days: i64,
    /// Half-life for freshness in new discoveries
    pub freshness_half_life_hours: f64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            personalization_weight: 0.8,
            new_discovery_days: 30,
            freshness_half_life_hours: 24.0 * 14.0,
        }
    }
}

/// Everything known about the requesting user for one generation cycle
#[derive(Debug, Clone)]
pub struct UserSignals {
    pub user_id: Option<String>,
    pub profile: UserProfile,
    pub insights: PreferenceInsights,
}

impl UserSignals {
    /// Enough history to personalize
    pub fn is_personalized(&self) -> bool {
        self.user_id.is_some() && !self.insights.is_fallback()
    }

    pub fn interaction_count(&self) -> u32 {
        self.profile.interactions.total
    }
}

pub struct RecommendationService {
    behavior: Arc<UserBehaviorStore>,
    analyzer: Arc<PreferenceAnalyzer>,
    market: Arc<MarketDataProvider>,
    clock: Arc<dyn Clock>,
    personal: Box<dyn ScreenScorer>,
    trend: Box<dyn ScreenScorer>,
    config: RecommendationConfig,
}

impl RecommendationService {
    pub fn new(
        behavior: Arc<UserBehaviorStore>,
        analyzer: Arc<PreferenceAnalyzer>,
        market: Arc<MarketDataProvider>,
        clock: Arc<dyn Clock>,
        config: RecommendationConfig,
    ) -> Self {
        Self {
            behavior,
            analyzer,
            market,
            clock,
            personal: Box::new(ProfileAffinityScorer::default()),
            trend: Box::new(MarketTrendScorer),
            config,
        }
    }

    /// Swap the personalization strategy
    pub fn with_personal_scorer(mut self, scorer: Box<dyn ScreenScorer>) -> Self {
        self.personal = scorer;
        self
    }

    /// Swap the trending strategy
    pub fn with_trend_scorer(mut self, scorer: Box<dyn ScreenScorer>) -> Self {
        self.trend = scorer;
        self
    }

    pub fn market(&self) -> &Arc<MarketDataProvider> {
        &self.market
    }

    /// Drop cached insights so the next cycle re-analyzes the user
    pub async fn invalidate_user(&self, user_id: &str) {
        self.analyzer.invalidate(user_id).await;
    }

    pub async fn signals(&self, user_id: Option<&str>) -> UserSignals {
        let now = self.clock.now();
        match user_id {
            Some(id) => UserSignals {
                user_id: Some(id.to_string()),
                profile: self.behavior.get_profile(id).await,
                insights: self.analyzer.analyze_preferences(id).await,
            },
            None => UserSignals {
                user_id: None,
                profile: UserProfile::empty(marketplace_cache::ANONYMOUS_USER, now),
                insights: PreferenceInsights::fallback(marketplace_cache::ANONYMOUS_USER, 0, now),
            },
        }
    }

    /// Personalized ranking; popularity ranked for users without history
    pub async fn top_picks(
        &self,
        signals: &UserSignals,
        pool: &[Screen],
        limit: usize,
    ) -> Vec<EnhancedScreen> {
        if !signals.is_personalized() {
            debug!(user_id = ?signals.user_id, "Top picks falling back to popularity");
            return self.popular(signals, pool, limit).await;
        }

        let scored = pool
            .iter()
            .map(|s| (s.clone(), self.blended(signals, s)))
            .collect();
        self.finish(signals, scored, limit).await
    }

    pub async fn trending(
        &self,
        signals: &UserSignals,
        location: Option<&str>,
        pool: &[Screen],
        limit: usize,
    ) -> Vec<EnhancedScreen> {
        let window = self.market.default_window_days();
        let trending = match self.market.get_trending(location, window).await {
            Ok(trending) => trending,
            Err(e) => {
                warn!(error = %e, "Trending lookup failed, using fallback list");
                return self.fallback(signals, pool, limit).await;
            }
        };

        let scores: HashMap<&str, f64> = trending
            .iter()
            .map(|t| (t.screen.id.as_str(), t.trending_score))
            .collect();
        let personalized = signals.is_personalized();
        let scored = pool
            .iter()
            .filter_map(|s| {
                let trend = *scores.get(s.id.as_str())?;
                let score = if personalized {
                    0.8 * trend + 0.2 * self.personal_score(signals, s, None)
                } else {
                    trend
                };
                Some((s.clone(), score))
            })
            .collect();
        self.finish(signals, scored, limit).await
    }

    /// Fresh inventory, biased toward categories the user has not explored
    pub async fn new_discoveries(
        &self,
        signals: &UserSignals,
        pool: &[Screen],
        limit: usize,
    ) -> Vec<EnhancedScreen> {
        let now = self.clock.now();
        let cutoff = now - Duration::days(self.config.new_discovery_days);
        let recent: Vec<&Screen> = pool.iter().filter(|s| s.created_at >= cutoff).collect();
        let candidates: Vec<&Screen> = if recent.is_empty() {
            pool.iter().collect()
        } else {
            recent
        };

        let scored = candidates
            .into_iter()
            .map(|s| {
                let age_hours = (now - s.created_at).num_minutes() as f64 / 60.0;
                let freshness = exponential_decay(age_hours, self.config.freshness_half_life_hours);
                let novelty = 1.0 - signals.profile.category_score(&s.category);
                (
                    s.clone(),
                    0.5 * freshness + 0.3 * novelty + 0.2 * s.popularity(),
                )
            })
            .collect();
        self.finish(signals, scored, limit).await
    }

    pub async fn similar_screens(
        &self,
        signals: &UserSignals,
        screen_id: &str,
        pool: &[Screen],
        limit: usize,
    ) -> Vec<EnhancedScreen> {
        match similar_to(screen_id, pool) {
            Ok(scored) => self.finish(signals, scored, limit).await,
            Err(e) => {
                warn!(screen_id = %screen_id, error = %e, "Similarity lookup failed");
                self.fallback(signals, pool, limit).await
            }
        }
    }

    /// Screens in the requested location, or the user's strongest one
    pub async fn geographic(
        &self,
        signals: &UserSignals,
        location: Option<&str>,
        pool: &[Screen],
        limit: usize,
    ) -> Vec<EnhancedScreen> {
        let target = location
            .map(str::to_string)
            .or_else(|| signals.profile.top_location().map(|l| l.city.clone()));
        let Some(target) = target else {
            return Vec::new();
        };

        let scored = pool
            .iter()
            .filter_map(|s| {
                let proximity = if s.location.city.eq_ignore_ascii_case(&target) {
                    1.0
                } else if s.location.region.eq_ignore_ascii_case(&target) {
                    0.6
                } else {
                    return None;
                };
                Some((s.clone(), 0.7 * proximity + 0.3 * self.blended(signals, s)))
            })
            .collect();
        self.finish(signals, scored, limit).await
    }

    pub async fn performance_based(
        &self,
        signals: &UserSignals,
        pool: &[Screen],
        limit: usize,
    ) -> Vec<EnhancedScreen> {
        let metrics = self.market.metrics_for(pool).await;
        let scored = pool
            .iter()
            .map(|s| {
                let composite = metrics.get(&s.id).map(|m| m.composite()).unwrap_or(0.0);
                (s.clone(), composite)
            })
            .collect();
        self.finish_with(signals, scored, limit, metrics)
    }

    /// Screens engaged by users who share history with this user
    pub async fn collaborative(
        &self,
        signals: &UserSignals,
        pool: &[Screen],
        limit: usize,
    ) -> Vec<EnhancedScreen> {
        let Some(user_id) = signals.user_id.as_deref() else {
            return self.popular(signals, pool, limit).await;
        };

        let own = self.behavior.get_interactions(user_id).await;
        let seen: HashSet<&str> = own.iter().map(|i| i.screen_id.as_str()).collect();

        let mut neighbours: HashSet<String> = HashSet::new();
        for screen_id in &seen {
            neighbours.extend(
                self.behavior
                    .users_who_interacted_with(screen_id)
                    .into_iter()
                    .filter(|u| u != user_id),
            );
        }

        let mut co_scores: HashMap<String, f64> = HashMap::new();
        for neighbour in &neighbours {
            for interaction in self.behavior.get_interactions(neighbour).await {
                if !seen.contains(interaction.screen_id.as_str()) {
                    *co_scores.entry(interaction.screen_id.clone()).or_default() +=
                        interaction.action().weight();
                }
            }
        }

        if co_scores.is_empty() {
            debug!(user_id = %user_id, "No co-occurrence signal, using popularity");
            return self.popular(signals, pool, limit).await;
        }

        let max = co_scores.values().copied().fold(0.0, f64::max);
        let scored = pool
            .iter()
            .filter_map(|s| {
                let co = co_scores.get(&s.id)? / max;
                Some((s.clone(), 0.8 * co + 0.2 * s.popularity()))
            })
            .collect();
        self.finish(signals, scored, limit).await
    }

    /// Most recent first, limited to what is still in the pool
    pub async fn recently_viewed(
        &self,
        signals: &UserSignals,
        pool: &[Screen],
        limit: usize,
    ) -> Vec<EnhancedScreen> {
        let by_id: HashMap<&str, &Screen> = pool.iter().map(|s| (s.id.as_str(), s)).collect();
        let recent: Vec<Screen> = signals
            .profile
            .recent_screens
            .iter()
            .filter_map(|ctx| by_id.get(ctx.screen_id.as_str()).map(|s| (*s).clone()))
            .take(limit)
            .collect();

        let metrics = self.market.metrics_for(&recent).await;
        let count = recent.len().max(1) as f64;
        // Keep recency order: the score only decreases along the list
        let scored = recent
            .into_iter()
            .enumerate()
            .map(|(rank, s)| (s, 1.0 - rank as f64 / count))
            .collect();
        self.finish_with(signals, scored, limit, metrics)
    }

    pub async fn popular(
        &self,
        signals: &UserSignals,
        pool: &[Screen],
        limit: usize,
    ) -> Vec<EnhancedScreen> {
        let scored = pool.iter().map(|s| (s.clone(), s.popularity())).collect();
        self.finish(signals, scored, limit).await
    }

    /// Deterministic list: top rated, then id order
    pub async fn fallback(
        &self,
        signals: &UserSignals,
        pool: &[Screen],
        limit: usize,
    ) -> Vec<EnhancedScreen> {
        let mut screens: Vec<Screen> = pool.to_vec();
        screens.sort_by(|a, b| desc(a.rating, b.rating).then_with(|| a.id.cmp(&b.id)));
        screens.truncate(limit);

        let metrics = self.market.metrics_for(&screens).await;
        let count = screens.len().max(1) as f64;
        let scored = screens
            .into_iter()
            .enumerate()
            .map(|(rank, s)| (s, 1.0 - rank as f64 / count))
            .collect();
        self.finish_with(signals, scored, limit, metrics)
    }

    /// Personal affinity blended with popularity
    fn blended(&self, signals: &UserSignals, screen: &Screen) -> f64 {
        if !signals.is_personalized() {
            return screen.popularity();
        }
        let w = self.config.personalization_weight;
        w * self.personal_score(signals, screen, None) + (1.0 - w) * screen.popularity()
    }

    fn personal_score(
        &self,
        signals: &UserSignals,
        screen: &Screen,
        metrics: Option<&PerformanceMetrics>,
    ) -> f64 {
        let input = ScoringInput {
            profile: &signals.profile,
            metrics,
        };
        self.personal.score(&input, screen).clamp(0.0, 1.0)
    }

    async fn finish(
        &self,
        signals: &UserSignals,
        mut scored: Vec<(Screen, f64)>,
        limit: usize,
    ) -> Vec<EnhancedScreen> {
        rank(&mut scored);
        scored.truncate(limit);
        let screens: Vec<Screen> = scored.iter().map(|(s, _)| s.clone()).collect();
        let metrics = self.market.metrics_for(&screens).await;
        self.finish_with(signals, scored, limit, metrics)
    }

    /// Rank, truncate and enhance
    fn finish_with(
        &self,
        signals: &UserSignals,
        mut scored: Vec<(Screen, f64)>,
        limit: usize,
        mut metrics: HashMap<String, PerformanceMetrics>,
    ) -> Vec<EnhancedScreen> {
        rank(&mut scored);
        scored.truncate(limit);

        scored
            .into_iter()
            .filter_map(|(screen, _)| {
                let performance = metrics.remove(&screen.id)?;
                let personalized = if signals.is_personalized() {
                    self.personal_score(signals, &screen, Some(&performance))
                } else {
                    0.0
                };
                let input = ScoringInput {
                    profile: &signals.profile,
                    metrics: Some(&performance),
                };
                let trending = self.trend.score(&input, &screen);
                Some(EnhancedScreen::enhance(screen, performance, personalized, trending))
            })
            .collect()
    }
}

/// Descending score, ties by id for a stable order
fn rank(scored: &mut [(Screen, f64)]) {
    scored.sort_by(|a, b| desc(a.1, b.1).then_with(|| a.0.id.cmp(&b.0.id)));
}

/// Weighted similarity between two screens in [0, 1]
pub fn similarity(a: &Screen, b: &Screen) -> f64 {
    let mut score = 0.0;
    if a.category == b.category {
        score += 0.4;
    }
    let base = a.price_per_day.max(b.price_per_day);
    if base > 0.0 && (a.price_per_day - b.price_per_day).abs() / base <= 0.3 {
        score += 0.3;
    }
    if a.location.city.eq_ignore_ascii_case(&b.location.city) {
        score += 0.2;
    }
    if (a.rating - b.rating).abs() <= 0.5 {
        score += 0.1;
    }
    score
}

fn similar_to(screen_id: &str, pool: &[Screen]) -> Result<Vec<(Screen, f64)>> {
    let anchor = pool
        .iter()
        .find(|s| s.id == screen_id)
        .ok_or_else(|| ServiceError::InvalidInput(format!("unknown screen {}", screen_id)))?;

    Ok(pool
        .iter()
        .filter(|s| s.id != anchor.id)
        .map(|s| (s.clone(), similarity(anchor, s)))
        .filter(|(_, score)| *score > 0.0)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Interaction, InteractionDetail, ScreenCategory};
    use crate::services::behavior::BehaviorStoreConfig;
    use crate::services::catalog::{demo_catalog, InMemoryCatalog};
    use crate::services::market_data::MarketDataConfig;
    use crate::services::preference::AnalyzerConfig;
    use chrono::Utc;
    use marketplace_cache::{ManualClock, MemoryStore, TypedCache};

    struct Fixture {
        service: RecommendationService,
        behavior: Arc<UserBehaviorStore>,
        clock: Arc<ManualClock>,
        pool: Vec<Screen>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let pool = demo_catalog(30);
        let behavior = Arc::new(UserBehaviorStore::new(clock.clone(), BehaviorStoreConfig::default()));
        let cache = TypedCache::new(Arc::new(MemoryStore::with_clock(clock.clone())));
        let analyzer = Arc::new(PreferenceAnalyzer::new(
            behavior.clone(),
            cache.clone(),
            clock.clone(),
            AnalyzerConfig {
                min_interactions: 3,
                ..Default::default()
            },
        ));
        let market = Arc::new(MarketDataProvider::new(
            Arc::new(InMemoryCatalog::new(pool.clone())),
            behavior.clone(),
            cache,
            clock.clone(),
            MarketDataConfig::default(),
        ));
        Fixture {
            service: RecommendationService::new(
                behavior.clone(),
                analyzer,
                market,
                clock.clone(),
                RecommendationConfig::default(),
            ),
            behavior,
            clock,
            pool,
        }
    }

    async fn engage(f: &Fixture, user: &str, screen: &Screen, times: usize) {
        for _ in 0..times {
            f.behavior
                .record_interaction(Interaction::new(
                    user,
                    screen.context(),
                    InteractionDetail::Favorite,
                    f.clock.now(),
                ))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_top_picks_zero_interactions_is_popularity_ranked() {
        let f = fixture();
        let signals = f.service.signals(Some("newcomer")).await;
        let picks = f.service.top_picks(&signals, &f.pool, 10).await;

        assert_eq!(picks.len(), 10);
        assert!(picks
            .windows(2)
            .all(|w| w[0].screen.popularity() >= w[1].screen.popularity()));
        assert!(picks.iter().all(|p| p.personalized_score == 0.0));
    }

    #[tokio::test]
    async fn test_top_picks_follow_preferences() {
        let f = fixture();
        let favourite = f
            .pool
            .iter()
            .find(|s| s.category == ScreenCategory::Airport)
            .unwrap()
            .clone();
        engage(&f, "u1", &favourite, 6).await;

        let signals = f.service.signals(Some("u1")).await;
        assert!(signals.is_personalized());
        let picks = f.service.top_picks(&signals, &f.pool, 5).await;
        assert_eq!(picks[0].screen.category, ScreenCategory::Airport);
        assert!(picks.iter().all(|p| (0.0..=1.0).contains(&p.personalized_score)));
    }

    #[tokio::test]
    async fn test_similar_screens_unknown_anchor_uses_fallback() {
        let f = fixture();
        let signals = f.service.signals(None).await;
        let similar = f.service.similar_screens(&signals, "missing", &f.pool, 4).await;
        assert_eq!(similar.len(), 4);
        assert!(similar
            .windows(2)
            .all(|w| w[0].screen.rating >= w[1].screen.rating));
    }

    #[tokio::test]
    async fn test_similar_screens_excludes_anchor() {
        let f = fixture();
        let signals = f.service.signals(None).await;
        let anchor = &f.pool[0];
        let similar = f.service.similar_screens(&signals, &anchor.id, &f.pool, 5).await;
        assert!(!similar.is_empty());
        assert!(similar.iter().all(|s| s.id() != anchor.id));
    }

    #[test]
    fn test_similarity_weights() {
        let a = Screen::new("a", "Berlin", ScreenCategory::Mall, 100.0, 4.0);
        let b = Screen::new("b", "Berlin", ScreenCategory::Mall, 120.0, 4.3);
        let c = Screen::new("c", "Munich", ScreenCategory::Transit, 500.0, 2.0);
        assert!((similarity(&a, &b) - 1.0).abs() < 1e-9);
        assert_eq!(similarity(&a, &c), 0.0);
    }

    #[tokio::test]
    async fn test_geographic_requires_location() {
        let f = fixture();
        let signals = f.service.signals(None).await;
        assert!(f.service.geographic(&signals, None, &f.pool, 5).await.is_empty());

        let hamburg = f.service.geographic(&signals, Some("Hamburg"), &f.pool, 5).await;
        assert!(!hamburg.is_empty());
        assert!(hamburg.iter().all(|s| s.screen.location.city == "Hamburg"));
    }

    #[tokio::test]
    async fn test_collaborative_uses_neighbours() {
        let f = fixture();
        let shared = f.pool[0].clone();
        let discovered = f.pool[7].clone();
        engage(&f, "u1", &shared, 1).await;
        engage(&f, "u2", &shared, 1).await;
        engage(&f, "u2", &discovered, 3).await;

        let signals = f.service.signals(Some("u1")).await;
        let picks = f.service.collaborative(&signals, &f.pool, 3).await;
        assert_eq!(picks[0].id(), discovered.id);
        assert!(picks.iter().all(|p| p.id() != shared.id));
    }

    #[tokio::test]
    async fn test_recently_viewed_keeps_order() {
        let f = fixture();
        engage(&f, "u1", &f.pool[3].clone(), 1).await;
        f.clock.advance(Duration::minutes(5));
        engage(&f, "u1", &f.pool[9].clone(), 1).await;

        let signals = f.service.signals(Some("u1")).await;
        let recent = f.service.recently_viewed(&signals, &f.pool, 5).await;
        let ids: Vec<&str> = recent.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![f.pool[9].id.as_str(), f.pool[3].id.as_str()]);
    }

    #[tokio::test]
    async fn test_scores_bounded_for_every_method() {
        let f = fixture();
        let signals = f.service.signals(None).await;
        let lists = vec![
            f.service.trending(&signals, None, &f.pool, 8).await,
            f.service.new_discoveries(&signals, &f.pool, 8).await,
            f.service.performance_based(&signals, &f.pool, 8).await,
            f.service.popular(&signals, &f.pool, 8).await,
        ];
        for list in lists {
            assert!(!list.is_empty());
            for s in list {
                assert!((0.0..=1.0).contains(&s.personalized_score));
                assert!((0.0..=1.0).contains(&s.trending_score));
                assert!((0.0..=1.0).contains(&s.recommendation_score));
            }
        }
    }
}
