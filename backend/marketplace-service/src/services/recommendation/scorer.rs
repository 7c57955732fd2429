use crate::models::{PerformanceMetrics, Screen, TrendDirection, UserProfile};

/// Inputs available to a scorer for one screen
pub struct ScoringInput<'a> {
    pub profile: &'a UserProfile,
    pub metrics: Option<&'a PerformanceMetrics>,
}

/// Pluggable scoring strategy. Implementations must return a value in [0, 1].
pub trait ScreenScorer: Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self, input: &ScoringInput<'_>, screen: &Screen) -> f64;
}

/// 用戶偏好匹配：category + location + budget fit + rating
#[derive(Debug, Clone)]
pub struct ProfileAffinityScorer {
    pub category_weight: f64,
    pub location_weight: f64,
    pub budget_weight: f64,
    pub rating_weight: f64,
}

impl Default for ProfileAffinityScorer {
    fn default() -> Self {
        Self {
            category_weight: 0.40,
            location_weight: 0.25,
            budget_weight: 0.20,
            rating_weight: 0.15,
        }
    }
}

impl ScreenScorer for ProfileAffinityScorer {
    fn name(&self) -> &'static str {
        "profile-affinity"
    }

    fn score(&self, input: &ScoringInput<'_>, screen: &Screen) -> f64 {
        let profile = input.profile;
        let category = profile.category_score(&screen.category);
        let location = profile
            .location_score(&screen.location.city)
            .max(profile.location_score(&screen.location.region));
        // Flat bonus inside the range
        let budget = if profile.budget.contains(screen.price_per_day) {
            1.0
        } else {
            0.0
        };
        let rating = (screen.rating / 5.0).clamp(0.0, 1.0);

        (self.category_weight * category
            + self.location_weight * location
            + self.budget_weight * budget
            + self.rating_weight * rating)
            .clamp(0.0, 1.0)
    }
}

/// Market momentum from performance metrics
#[derive(Debug, Clone, Default)]
pub struct MarketTrendScorer;

impl ScreenScorer for MarketTrendScorer {
    fn name(&self) -> &'static str {
        "market-trend"
    }

    fn score(&self, input: &ScoringInput<'_>, screen: &Screen) -> f64 {
        let Some(metrics) = input.metrics else {
            return 0.5 * screen.popularity();
        };
        let trend = match metrics.trend {
            TrendDirection::Up => 1.0,
            TrendDirection::Stable => 0.5,
            TrendDirection::Down => 0.0,
        };
        (0.5 * metrics.booking_rate + 0.3 * metrics.engagement_score + 0.2 * trend).clamp(0.0, 1.0)
    }
}
