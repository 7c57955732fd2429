use super::{Screen, ScreenCategory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingFrequency {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl BookingFrequency {
    pub fn from_booking_rate(rate: f64) -> Self {
        match rate {
            r if r < 0.2 => BookingFrequency::VeryLow,
            r if r < 0.4 => BookingFrequency::Low,
            r if r < 0.6 => BookingFrequency::Medium,
            r if r < 0.8 => BookingFrequency::High,
            _ => BookingFrequency::VeryHigh,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub screen_id: String,
    /// [0, 1]
    pub booking_rate: f64,
    /// [0, 1]
    pub engagement_score: f64,
    /// [0, 1]
    pub conversion_rate: f64,
    pub impressions: u64,
    pub revenue: f64,
    pub trend: TrendDirection,
    /// Hours of day (0-23) with the highest audience
    pub peak_hours: Vec<u8>,
}

impl PerformanceMetrics {
    /// Combined performance signal in [0, 1]
    pub fn composite(&self) -> f64 {
        // Conversion rates rarely exceed 15%, so scale before averaging.
        let conversion = (self.conversion_rate / 0.15).clamp(0.0, 1.0);
        ((self.booking_rate + self.engagement_score + conversion) / 3.0).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub click_through_rate: f64,
    pub favorite_rate: f64,
    pub average_view_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudienceInsights {
    /// Age bracket -> share of audience
    pub demographics: BTreeMap<String, f64>,
    pub peak_hours: Vec<u8>,
}

/// Screen with derived market and personalisation fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedScreen {
    pub screen: Screen,
    pub performance: PerformanceMetrics,
    pub personalized_score: f64,
    pub trending_score: f64,
    pub recommendation_score: f64,
    pub booking_frequency: BookingFrequency,
    pub engagement: EngagementMetrics,
    pub audience: AudienceInsights,
}

impl EnhancedScreen {
    /// Pure derivation: the same inputs always yield the same enhanced screen.
    pub fn enhance(
        screen: Screen,
        performance: PerformanceMetrics,
        personalized_score: f64,
        trending_score: f64,
    ) -> Self {
        let personalized_score = personalized_score.clamp(0.0, 1.0);
        let trending_score = trending_score.clamp(0.0, 1.0);
        let recommendation_score = (0.5 * personalized_score
            + 0.3 * trending_score
            + 0.2 * (screen.rating / 5.0))
            .clamp(0.0, 1.0);

        let engagement = EngagementMetrics {
            click_through_rate: (performance.engagement_score * 0.12).clamp(0.0, 1.0),
            favorite_rate: (performance.engagement_score * performance.booking_rate * 0.2)
                .clamp(0.0, 1.0),
            average_view_secs: 5.0 + performance.engagement_score * 25.0,
        };

        let audience = AudienceInsights {
            demographics: demographics_for(&screen.category),
            peak_hours: performance.peak_hours.clone(),
        };

        Self {
            booking_frequency: BookingFrequency::from_booking_rate(performance.booking_rate),
            screen,
            performance,
            personalized_score,
            trending_score,
            recommendation_score,
            engagement,
            audience,
        }
    }

    pub fn id(&self) -> &str {
        &self.screen.id
    }
}

fn demographics_for(category: &ScreenCategory) -> BTreeMap<String, f64> {
    let shares: [f64; 4] = match category {
        ScreenCategory::Transit => [0.35, 0.35, 0.2, 0.1],
        ScreenCategory::Mall => [0.3, 0.3, 0.25, 0.15],
        ScreenCategory::Airport => [0.15, 0.35, 0.35, 0.15],
        ScreenCategory::Stadium => [0.4, 0.35, 0.2, 0.05],
        _ => [0.25, 0.3, 0.3, 0.15],
    };
    ["18-24", "25-34", "35-54", "55+"]
        .iter()
        .zip(shares)
        .map(|(bracket, share)| (bracket.to_string(), share))
        .collect()
}
