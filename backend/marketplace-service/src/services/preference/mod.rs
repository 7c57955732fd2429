// ============================================
// Preference Analyzer (偏好分析)
// ============================================
//
// Aggregates a user's interaction log into confidence-scored insights:
// - per-category and per-location preference scores
// - price sensitivity and preferred price range
// - behavior patterns (not mutually exclusive)
// - ranked recommendation factors
//
// PreferenceScore = Σ factor * weight
//   recency 0.30, frequency 0.25, engagement 0.20, conversion 0.15, time_spent 0.10

use crate::models::{Interaction, InteractionAction};
use crate::services::behavior::UserBehaviorStore;
use crate::utils::{desc, exponential_decay, percentile, saturate};
use chrono::{DateTime, Duration, Utc};
use marketplace_cache::{CacheKey, Clock, TypedCache};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Neutral price range used when there is not enough history
const NEUTRAL_MIN_PRICE: f64 = 0.0;
const NEUTRAL_MAX_PRICE: f64 = 5000.0;
const NEUTRAL_PREFERRED_PRICE: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorWeights {
    pub recency: f64,
    pub frequency: f64,
    pub engagement: f64,
    pub conversion: f64,
    pub time_spent: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            recency: 0.30,
            frequency: 0.25,
            engagement: 0.20,
            conversion: 0.15,
            time_spent: 0.10,
        }
    }
}

impl FactorWeights {
    fn total(&self) -> f64 {
        self.recency + self.frequency + self.engagement + self.conversion + self.time_spent
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Below this many interactions the fallback insight set is returned
    pub min_interactions: u32,
    pub cache_ttl: Duration,
    pub weights: FactorWeights,
    pub recency_half_life_hours: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_interactions: 10,
            cache_ttl: marketplace_cache::ttl::insights(),
            weights: FactorWeights::default(),
            recency_half_life_hours: 168.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreFactors {
    pub recency: f64,
    pub frequency: f64,
    pub engagement: f64,
    pub conversion: f64,
    pub time_spent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreferenceScore {
    pub value: f64,
    pub confidence: f64,
    pub factors: ScoreFactors,
}

impl PreferenceScore {
    /// Returned for categories or locations the user never touched
    pub fn placeholder() -> Self {
        Self {
            value: 0.0,
            confidence: 0.0,
            factors: ScoreFactors::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSensitivity {
    /// 0 = indifferent to price, 1 = highly price sensitive
    pub elasticity: f64,
    pub min: f64,
    pub max: f64,
    pub preferred: f64,
}

impl PriceSensitivity {
    pub fn neutral() -> Self {
        Self {
            elasticity: 0.5,
            min: NEUTRAL_MIN_PRICE,
            max: NEUTRAL_MAX_PRICE,
            preferred: NEUTRAL_PREFERRED_PRICE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Browsing,
    Comparison,
    Impulse,
    Research,
    Loyalty,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BehaviorPattern {
    pub kind: PatternKind,
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationFactor {
    pub name: String,
    pub weight: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceInsights {
    pub user_id: String,
    pub categories: BTreeMap<String, PreferenceScore>,
    pub locations: BTreeMap<String, PreferenceScore>,
    pub price: PriceSensitivity,
    pub patterns: Vec<BehaviorPattern>,
    pub factors: Vec<RecommendationFactor>,
    pub confidence: f64,
    pub interaction_count: u32,
    pub generated_at: DateTime<Utc>,
}

impl PreferenceInsights {
    /// Insight set for users below the interaction threshold
    pub fn fallback(user_id: &str, interaction_count: u32, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            categories: BTreeMap::new(),
            locations: BTreeMap::new(),
            price: PriceSensitivity::neutral(),
            patterns: Vec::new(),
            factors: vec![RecommendationFactor {
                name: "popularity".to_string(),
                weight: 1.0,
                description: "Not enough history; ranking by overall popularity".to_string(),
            }],
            confidence: 0.0,
            interaction_count,
            generated_at: now,
        }
    }

    pub fn category_score(&self, category: &str) -> PreferenceScore {
        self.categories
            .get(category)
            .copied()
            .unwrap_or_else(PreferenceScore::placeholder)
    }

    pub fn location_score(&self, location: &str) -> PreferenceScore {
        self.locations
            .get(&location.to_lowercase())
            .copied()
            .unwrap_or_else(PreferenceScore::placeholder)
    }

    pub fn pattern_strength(&self, kind: PatternKind) -> f64 {
        self.patterns
            .iter()
            .find(|p| p.kind == kind)
            .map(|p| p.strength)
            .unwrap_or(0.0)
    }

    pub fn is_fallback(&self) -> bool {
        self.confidence == 0.0
    }
}

pub struct PreferenceAnalyzer {
    behavior: Arc<UserBehaviorStore>,
    cache: TypedCache,
    clock: Arc<dyn Clock>,
    config: AnalyzerConfig,
}

impl PreferenceAnalyzer {
    pub fn new(
        behavior: Arc<UserBehaviorStore>,
        cache: TypedCache,
        clock: Arc<dyn Clock>,
        config: AnalyzerConfig,
    ) -> Self {
        Self {
            behavior,
            cache,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Insights for `user_id`, served from cache within the TTL
    pub async fn analyze_preferences(&self, user_id: &str) -> PreferenceInsights {
        let key = CacheKey::insights(user_id);
        match self.cache.get::<PreferenceInsights>(&key).await {
            Ok(Some(insights)) => {
                debug!(user_id = %user_id, "Preference insights cache hit");
                return insights;
            }
            Ok(None) => {}
            Err(e) => warn!(user_id = %user_id, error = %e, "Insights cache read failed"),
        }

        let interactions = self.behavior.get_interactions(user_id).await;
        let insights = analyze(user_id, &interactions, self.clock.now(), &self.config);

        if let Err(e) = self
            .cache
            .set(&key, &insights, Some(self.config.cache_ttl))
            .await
        {
            warn!(user_id = %user_id, error = %e, "Insights cache write failed");
        }

        info!(
            user_id = %user_id,
            interactions = insights.interaction_count,
            confidence = insights.confidence,
            categories = insights.categories.len(),
            "Analyzed preferences"
        );
        insights
    }

    pub async fn invalidate(&self, user_id: &str) {
        if let Err(e) = self.cache.del(&CacheKey::insights(user_id)).await {
            warn!(user_id = %user_id, error = %e, "Failed to invalidate insights");
        }
    }
}

/// Pure analysis over an interaction log
pub fn analyze(
    user_id: &str,
    interactions: &[Interaction],
    now: DateTime<Utc>,
    config: &AnalyzerConfig,
) -> PreferenceInsights {
    let count = interactions.len() as u32;
    if count < config.min_interactions.max(1) {
        return PreferenceInsights::fallback(user_id, count, now);
    }

    let mut by_category: HashMap<String, Vec<&Interaction>> = HashMap::new();
    let mut by_location: HashMap<String, Vec<&Interaction>> = HashMap::new();
    for interaction in interactions {
        by_category
            .entry(interaction.screen.category.as_str().to_string())
            .or_default()
            .push(interaction);
        by_location
            .entry(interaction.screen.city.to_lowercase())
            .or_default()
            .push(interaction);
    }

    let score_groups = |groups: HashMap<String, Vec<&Interaction>>| {
        groups
            .into_iter()
            .map(|(key, group)| (key, score_group(&group, now, config)))
            .collect::<BTreeMap<_, _>>()
    };
    let categories = score_groups(by_category);
    let locations = score_groups(by_location);

    let price = price_sensitivity(interactions);
    let patterns = behavior_patterns(interactions);
    let confidence = saturate(count as f64, config.min_interactions.max(1) as f64 * 2.0);
    let factors = recommendation_factors(&categories, &locations, &price, &patterns, confidence);

    PreferenceInsights {
        user_id: user_id.to_string(),
        categories,
        locations,
        price,
        patterns,
        factors,
        confidence,
        interaction_count: count,
        generated_at: now,
    }
}

fn score_group(group: &[&Interaction], now: DateTime<Utc>, config: &AnalyzerConfig) -> PreferenceScore {
    let n = group.len() as f64;
    let last = group.iter().map(|i| i.timestamp).max().unwrap_or(now);
    let age_hours = (now - last).num_minutes() as f64 / 60.0;
    let purchases = group
        .iter()
        .filter(|i| i.action() == InteractionAction::Purchase)
        .count() as f64;
    let view_secs: u32 = group.iter().filter_map(|i| i.detail.view_duration_secs()).sum();
    let mean_weight = group.iter().map(|i| i.action().weight()).sum::<f64>() / n;

    let factors = ScoreFactors {
        recency: exponential_decay(age_hours, config.recency_half_life_hours),
        frequency: saturate(n, 5.0),
        engagement: (mean_weight / InteractionAction::Purchase.weight()).clamp(0.0, 1.0),
        conversion: purchases / n,
        time_spent: saturate(view_secs as f64, 120.0),
    };

    let w = &config.weights;
    let total = w.total();
    let value = if total > 0.0 {
        (factors.recency * w.recency
            + factors.frequency * w.frequency
            + factors.engagement * w.engagement
            + factors.conversion * w.conversion
            + factors.time_spent * w.time_spent)
            / total
    } else {
        0.0
    };

    PreferenceScore {
        value: value.clamp(0.0, 1.0),
        confidence: saturate(n, 5.0),
        factors,
    }
}

fn price_sensitivity(interactions: &[Interaction]) -> PriceSensitivity {
    let mut prices: Vec<f64> = interactions
        .iter()
        .map(|i| i.screen.price_per_day)
        .filter(|p| p.is_finite() && *p > 0.0)
        .collect();
    if prices.is_empty() {
        return PriceSensitivity::neutral();
    }
    prices.sort_by(|a, b| a.total_cmp(b));

    let mean = prices.iter().sum::<f64>() / prices.len() as f64;
    let variance = prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / prices.len() as f64;
    let spread = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };

    // Buying below the engaged average signals price sensitivity
    let purchased: Vec<f64> = interactions
        .iter()
        .filter(|i| i.action() == InteractionAction::Purchase)
        .map(|i| i.screen.price_per_day)
        .collect();
    let discount_bias = if purchased.is_empty() || mean <= 0.0 {
        0.0
    } else {
        let purchased_mean = purchased.iter().sum::<f64>() / purchased.len() as f64;
        (1.0 - purchased_mean / mean).clamp(0.0, 1.0)
    };

    PriceSensitivity {
        elasticity: (0.5 * spread.min(1.0) + 0.5 * discount_bias).clamp(0.0, 1.0),
        min: percentile(&prices, 0.1).unwrap_or(NEUTRAL_MIN_PRICE),
        max: percentile(&prices, 0.9).unwrap_or(NEUTRAL_MAX_PRICE),
        preferred: percentile(&prices, 0.5).unwrap_or(NEUTRAL_PREFERRED_PRICE),
    }
}

fn behavior_patterns(interactions: &[Interaction]) -> Vec<BehaviorPattern> {
    let total = interactions.len() as f64;
    if total == 0.0 {
        return Vec::new();
    }

    let count_of = |action: InteractionAction| {
        interactions.iter().filter(|i| i.action() == action).count() as f64
    };
    let views = count_of(InteractionAction::View);
    let clicks = count_of(InteractionAction::Click);
    let purchases = count_of(InteractionAction::Purchase);

    let distinct_screens = interactions
        .iter()
        .map(|i| i.screen_id.as_str())
        .collect::<HashSet<_>>()
        .len() as f64;

    // Purchases with no earlier interaction on the same screen
    let mut ordered: Vec<&Interaction> = interactions.iter().collect();
    ordered.sort_by_key(|i| i.timestamp);
    let mut touched = HashSet::new();
    let mut impulse_buys = 0.0;
    for interaction in &ordered {
        if interaction.action() == InteractionAction::Purchase && !touched.contains(&interaction.screen_id) {
            impulse_buys += 1.0;
        }
        touched.insert(interaction.screen_id.clone());
    }

    let view_durations: Vec<u32> = interactions
        .iter()
        .filter_map(|i| i.detail.view_duration_secs())
        .collect();
    let mean_view = if view_durations.is_empty() {
        0.0
    } else {
        view_durations.iter().sum::<u32>() as f64 / view_durations.len() as f64
    };

    let mut category_counts: HashMap<&str, usize> = HashMap::new();
    for interaction in interactions {
        *category_counts
            .entry(interaction.screen.category.as_str())
            .or_default() += 1;
    }
    let dominant = category_counts.values().copied().max().unwrap_or(0) as f64;

    let mut patterns = vec![
        BehaviorPattern {
            kind: PatternKind::Browsing,
            strength: views / total,
        },
        BehaviorPattern {
            kind: PatternKind::Comparison,
            strength: (distinct_screens / total) * ((views + clicks) / total),
        },
        BehaviorPattern {
            kind: PatternKind::Impulse,
            strength: if purchases > 0.0 { impulse_buys / purchases } else { 0.0 },
        },
        BehaviorPattern {
            kind: PatternKind::Research,
            strength: saturate(mean_view, 60.0),
        },
        BehaviorPattern {
            kind: PatternKind::Loyalty,
            strength: dominant / total,
        },
    ];
    for pattern in &mut patterns {
        pattern.strength = pattern.strength.clamp(0.0, 1.0);
    }
    patterns.sort_by(|a, b| desc(a.strength, b.strength));
    patterns
}

fn recommendation_factors(
    categories: &BTreeMap<String, PreferenceScore>,
    locations: &BTreeMap<String, PreferenceScore>,
    price: &PriceSensitivity,
    patterns: &[BehaviorPattern],
    confidence: f64,
) -> Vec<RecommendationFactor> {
    let best = |scores: &BTreeMap<String, PreferenceScore>| {
        scores
            .iter()
            .max_by(|a, b| a.1.value.total_cmp(&b.1.value))
            .map(|(name, score)| (name.clone(), score.value))
    };
    let browsing = patterns
        .iter()
        .find(|p| p.kind == PatternKind::Browsing)
        .map(|p| p.strength)
        .unwrap_or(0.0);

    let mut raw = Vec::new();
    if let Some((name, value)) = best(categories) {
        raw.push(("category", value, format!("Strong interest in {}", name)));
    }
    if let Some((name, value)) = best(locations) {
        raw.push(("location", value, format!("Frequently engages with {}", name)));
    }
    raw.push((
        "price",
        price.elasticity,
        format!("Prefers around {:.0} per day", price.preferred),
    ));
    raw.push((
        "popularity",
        1.0 - confidence,
        "Popular screens fill gaps in the history".to_string(),
    ));
    raw.push((
        "novelty",
        browsing,
        "Explores new inventory often".to_string(),
    ));

    let total: f64 = raw.iter().map(|(_, w, _)| *w).sum();
    let mut factors: Vec<RecommendationFactor> = raw
        .into_iter()
        .map(|(name, weight, description)| RecommendationFactor {
            name: name.to_string(),
            weight: if total > 0.0 { weight / total } else { 0.0 },
            description,
        })
        .collect();
    factors.sort_by(|a, b| desc(a.weight, b.weight));
    factors
}
