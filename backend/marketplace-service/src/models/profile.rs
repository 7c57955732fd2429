use super::{ScreenCategory, ScreenContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPreference {
    pub category: ScreenCategory,
    /// [0, 1]
    pub score: f64,
    pub interaction_count: u32,
    pub last_interaction: DateTime<Utc>,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPreference {
    pub city: String,
    pub region: String,
    /// [0, 1]
    pub score: f64,
    pub purchase_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BudgetRange {
    pub min: f64,
    pub max: f64,
    pub preferred: f64,
    pub confidence: f64,
}

impl BudgetRange {
    pub fn contains(&self, price: f64) -> bool {
        self.confidence > 0.0 && price >= self.min && price <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InteractionSummary {
    pub total: u32,
    pub views: u32,
    pub clicks: u32,
    pub favorites: u32,
    pub purchases: u32,
    pub shares: u32,
    pub sessions: u32,
    pub last_interaction: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PurchaseSummary {
    pub total_purchases: u32,
    pub total_spent: f64,
    pub average_order_value: f64,
    pub last_purchase: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub notifications: NotificationSettings,
    pub display: DisplaySettings,
    pub privacy: PrivacySettings,
    pub accessibility: AccessibilitySettings,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            notifications: NotificationSettings {
                email: true,
                push: false,
                price_alerts: true,
            },
            display: DisplaySettings {
                compact_cards: false,
                show_scores: false,
            },
            privacy: PrivacySettings {
                personalization: true,
                share_analytics: true,
            },
            accessibility: AccessibilitySettings {
                high_contrast: false,
                reduced_motion: false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub email: bool,
    pub push: bool,
    pub price_alerts: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySettings {
    pub compact_cards: bool,
    pub show_scores: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacySettings {
    /// When false the pipeline serves non-personalised sections only
    pub personalization: bool,
    pub share_analytics: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessibilitySettings {
    pub high_contrast: bool,
    pub reduced_motion: bool,
}

/// Aggregate derived from a user's interaction log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    /// Sorted by score, descending
    pub preferred_categories: Vec<CategoryPreference>,
    /// Sorted by score, descending
    pub location_preferences: Vec<LocationPreference>,
    pub budget: BudgetRange,
    pub behavior_score: f64,
    pub interactions: InteractionSummary,
    pub purchases: PurchaseSummary,
    pub settings: UserSettings,
    /// Most recent first, at most ten entries
    pub recent_screens: Vec<ScreenContext>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn empty(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            preferred_categories: Vec::new(),
            location_preferences: Vec::new(),
            budget: BudgetRange::default(),
            behavior_score: 0.0,
            interactions: InteractionSummary::default(),
            purchases: PurchaseSummary::default(),
            settings: UserSettings::default(),
            recent_screens: Vec::new(),
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.total == 0
    }

    pub fn category_score(&self, category: &ScreenCategory) -> f64 {
        self.preferred_categories
            .iter()
            .find(|c| &c.category == category)
            .map(|c| c.score)
            .unwrap_or(0.0)
    }

    pub fn location_score(&self, city: &str) -> f64 {
        self.location_preferences
            .iter()
            .find(|l| l.city.eq_ignore_ascii_case(city))
            .map(|l| l.score)
            .unwrap_or(0.0)
    }

    pub fn top_location(&self) -> Option<&LocationPreference> {
        self.location_preferences.first()
    }

    pub fn top_categories(&self, n: usize) -> Vec<ScreenCategory> {
        self.preferred_categories
            .iter()
            .take(n)
            .map(|c| c.category.clone())
            .collect()
    }
}
