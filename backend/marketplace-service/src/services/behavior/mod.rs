// ============================================
// User Behavior Store (用戶行為存儲)
// ============================================
//
// Keeps the per-user interaction log and derives user profiles from it.
//
// Interest scoring formula:
// score = 0.8 * saturate(SUM(action_weight * decay(age)), 5) + 0.2 * conversion_rate
//
// Action weights:
// - View: 1.0
// - Click: 2.0
// - Favorite / Share: 3.0
// - Purchase: 5.0
//
// Profiles are rebuilt lazily: recording an interaction drops the memoised
// profile, the next read rebuilds it from the full log.

use crate::error::{Result, ServiceError};
use crate::models::{
    BudgetRange, CategoryPreference, Interaction, InteractionAction, InteractionDetail,
    InteractionSummary, LocationPreference, PurchaseSummary, ScreenCategory, ScreenContext,
    UserProfile,
};
use crate::utils::{exponential_decay, saturate};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use marketplace_cache::Clock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration for profile building
#[derive(Debug, Clone)]
pub struct BehaviorStoreConfig {
    /// Oldest interactions are dropped beyond this many per user
    pub max_interactions_per_user: usize,
    /// Half-life for recency decay (hours)
    pub recency_half_life_hours: f64,
    /// Number of recent screens kept on the profile
    pub recent_screens: usize,
}

impl Default for BehaviorStoreConfig {
    fn default() -> Self {
        Self {
            max_interactions_per_user: 1000,
            recency_half_life_hours: 168.0, // 7 days
            recent_screens: 10,
        }
    }
}

pub struct UserBehaviorStore {
    logs: DashMap<String, Vec<Interaction>>,
    profiles: DashMap<String, UserProfile>,
    clock: Arc<dyn Clock>,
    config: BehaviorStoreConfig,
}

impl UserBehaviorStore {
    pub fn new(clock: Arc<dyn Clock>, config: BehaviorStoreConfig) -> Self {
        Self {
            logs: DashMap::new(),
            profiles: DashMap::new(),
            clock,
            config,
        }
    }

    /// Append an interaction to the user's log
    pub async fn record_interaction(&self, interaction: Interaction) -> Result<()> {
        if interaction.user_id.trim().is_empty() || interaction.screen_id.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "interaction requires user_id and screen_id".to_string(),
            ));
        }

        let user_id = interaction.user_id.clone();
        let action = interaction.action();
        {
            let mut log = self.logs.entry(user_id.clone()).or_default();
            log.push(interaction);
            if log.len() > self.config.max_interactions_per_user {
                let overflow = log.len() - self.config.max_interactions_per_user;
                log.drain(..overflow);
            }
        }
        self.profiles.remove(&user_id);

        debug!(user_id = %user_id, action = action.as_str(), "Recorded interaction");
        Ok(())
    }

    /// Profile for `user_id`; users without history get the empty profile
    pub async fn get_profile(&self, user_id: &str) -> UserProfile {
        if let Some(profile) = self.profiles.get(user_id) {
            return profile.clone();
        }

        let interactions = self.get_interactions(user_id).await;
        let profile = build_profile(user_id, &interactions, self.clock.now(), &self.config);

        if !interactions.is_empty() {
            info!(
                user_id = %user_id,
                interactions = interactions.len(),
                categories = profile.preferred_categories.len(),
                "Built user profile"
            );
            self.profiles.insert(user_id.to_string(), profile.clone());
        }
        profile
    }

    pub async fn get_interactions(&self, user_id: &str) -> Vec<Interaction> {
        self.logs
            .get(user_id)
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn interaction_count(&self, user_id: &str) -> usize {
        self.logs.get(user_id).map(|log| log.len()).unwrap_or(0)
    }

    /// Users who interacted with `screen_id` at least once
    pub fn users_who_interacted_with(&self, screen_id: &str) -> Vec<String> {
        self.logs
            .iter()
            .filter(|entry| entry.value().iter().any(|i| i.screen_id == screen_id))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Every recorded interaction at or after `cutoff`, across all users
    pub fn interactions_since(&self, cutoff: DateTime<Utc>) -> Vec<Interaction> {
        self.logs
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|i| i.timestamp >= cutoff)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[derive(Default)]
struct Bucket {
    weighted: f64,
    count: u32,
    purchases: u32,
    last: Option<DateTime<Utc>>,
    region: String,
}

impl Bucket {
    fn add(&mut self, weight: f64, action: InteractionAction, at: DateTime<Utc>) {
        self.weighted += weight;
        self.count += 1;
        if action == InteractionAction::Purchase {
            self.purchases += 1;
        }
        self.last = Some(self.last.map_or(at, |last| last.max(at)));
    }

    fn conversion(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.purchases as f64 / self.count as f64
        }
    }

    fn score(&self) -> f64 {
        (0.8 * saturate(self.weighted, 5.0) + 0.2 * self.conversion()).clamp(0.0, 1.0)
    }
}

/// Derive a profile from a full interaction log
pub fn build_profile(
    user_id: &str,
    interactions: &[Interaction],
    now: DateTime<Utc>,
    config: &BehaviorStoreConfig,
) -> UserProfile {
    let mut profile = UserProfile::empty(user_id, now);
    if interactions.is_empty() {
        return profile;
    }

    let mut categories: HashMap<ScreenCategory, Bucket> = HashMap::new();
    let mut locations: HashMap<String, Bucket> = HashMap::new();
    let mut summary = InteractionSummary::default();
    let mut purchases = PurchaseSummary::default();
    let mut sessions: HashSet<&str> = HashSet::new();
    let mut total_weighted = 0.0;

    for interaction in interactions {
        let action = interaction.action();
        let age_hours = (now - interaction.timestamp).num_minutes() as f64 / 60.0;
        let weight = action.weight() * exponential_decay(age_hours, config.recency_half_life_hours);
        total_weighted += weight;

        categories
            .entry(interaction.screen.category.clone())
            .or_default()
            .add(weight, action, interaction.timestamp);

        let location = locations
            .entry(interaction.screen.city.clone())
            .or_default();
        location.add(weight, action, interaction.timestamp);
        location.region = interaction.screen.region.clone();

        summary.total += 1;
        match action {
            InteractionAction::View => summary.views += 1,
            InteractionAction::Click => summary.clicks += 1,
            InteractionAction::Favorite => summary.favorites += 1,
            InteractionAction::Purchase => summary.purchases += 1,
            InteractionAction::Share => summary.shares += 1,
        }
        summary.last_interaction = Some(
            summary
                .last_interaction
                .map_or(interaction.timestamp, |last| last.max(interaction.timestamp)),
        );
        sessions.insert(interaction.context.session_id.as_str());

        if let InteractionDetail::Purchase { amount, .. } = &interaction.detail {
            purchases.total_purchases += 1;
            purchases.total_spent += amount;
            purchases.last_purchase = Some(
                purchases
                    .last_purchase
                    .map_or(interaction.timestamp, |last| last.max(interaction.timestamp)),
            );
        }
    }
    summary.sessions = sessions.len() as u32;
    if purchases.total_purchases > 0 {
        purchases.average_order_value = purchases.total_spent / purchases.total_purchases as f64;
    }

    let mut preferred_categories: Vec<CategoryPreference> = categories
        .into_iter()
        .map(|(category, bucket)| CategoryPreference {
            score: bucket.score(),
            interaction_count: bucket.count,
            last_interaction: bucket.last.unwrap_or(now),
            conversion_rate: bucket.conversion(),
            category,
        })
        .collect();
    preferred_categories.sort_by(|a, b| {
        crate::utils::desc(a.score, b.score)
            .then_with(|| a.category.as_str().cmp(b.category.as_str()))
    });

    let mut location_preferences: Vec<LocationPreference> = locations
        .into_iter()
        .map(|(city, bucket)| LocationPreference {
            score: bucket.score(),
            purchase_count: bucket.purchases,
            region: bucket.region.clone(),
            city,
        })
        .collect();
    location_preferences
        .sort_by(|a, b| crate::utils::desc(a.score, b.score).then_with(|| a.city.cmp(&b.city)));

    profile.budget = budget_range(interactions);
    profile.behavior_score = saturate(total_weighted, 20.0);
    profile.preferred_categories = preferred_categories;
    profile.location_preferences = location_preferences;
    profile.interactions = summary;
    profile.purchases = purchases;
    profile.recent_screens = recent_screens(interactions, config.recent_screens);
    profile
}

/// Price range the user engages with, weighted toward purchases
fn budget_range(interactions: &[Interaction]) -> BudgetRange {
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;

    for interaction in interactions {
        let price = interaction.screen.price_per_day;
        let weight = interaction.action().budget_weight();
        min = min.min(price);
        max = max.max(price);
        weighted_sum += price * weight;
        total_weight += weight;
    }

    if total_weight == 0.0 {
        return BudgetRange::default();
    }

    BudgetRange {
        min,
        max,
        preferred: weighted_sum / total_weight,
        confidence: saturate(interactions.len() as f64, 10.0),
    }
}

fn recent_screens(interactions: &[Interaction], limit: usize) -> Vec<ScreenContext> {
    let mut ordered: Vec<&Interaction> = interactions.iter().collect();
    ordered.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let mut seen = HashSet::new();
    ordered
        .into_iter()
        .filter(|i| seen.insert(i.screen_id.clone()))
        .take(limit)
        .map(|i| i.screen.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Screen, ScreenCategory};
    use chrono::Duration;
    use marketplace_cache::ManualClock;

    fn store() -> (UserBehaviorStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (
            UserBehaviorStore::new(clock.clone(), BehaviorStoreConfig::default()),
            clock,
        )
    }

    fn interaction(user: &str, screen: &Screen, detail: InteractionDetail, at: DateTime<Utc>) -> Interaction {
        Interaction::new(user, screen.context(), detail, at)
    }

    #[tokio::test]
    async fn test_empty_profile_for_unknown_user() {
        let (store, _) = store();
        let profile = store.get_profile("ghost").await;
        assert!(profile.is_empty());
        assert!(profile.preferred_categories.is_empty());
        assert_eq!(profile.budget.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_purchases_dominate_category_scores() {
        let (store, clock) = store();
        let now = clock.now();
        let mall = Screen::new("m1", "Berlin", ScreenCategory::Mall, 200.0, 4.0);
        let transit = Screen::new("t1", "Munich", ScreenCategory::Transit, 90.0, 4.0);

        store
            .record_interaction(interaction(
                "u1",
                &mall,
                InteractionDetail::Purchase { amount: 1400.0, booking_days: 7 },
                now,
            ))
            .await
            .unwrap();
        store
            .record_interaction(interaction(
                "u1",
                &transit,
                InteractionDetail::View { duration_secs: Some(10) },
                now,
            ))
            .await
            .unwrap();

        let profile = store.get_profile("u1").await;
        assert_eq!(profile.preferred_categories[0].category, ScreenCategory::Mall);
        assert!(profile.category_score(&ScreenCategory::Mall) > profile.category_score(&ScreenCategory::Transit));
        assert_eq!(profile.location_preferences[0].city, "Berlin");
        assert_eq!(profile.location_preferences[0].purchase_count, 1);
        assert_eq!(profile.purchases.total_purchases, 1);
        assert_eq!(profile.purchases.average_order_value, 1400.0);
        assert!(profile.budget.contains(150.0));
        // Weighted toward the purchased screen
        assert!(profile.budget.preferred > 145.0);
    }

    #[tokio::test]
    async fn test_recency_decay_lowers_old_interest() {
        let config = BehaviorStoreConfig::default();
        let now = Utc::now();
        let screen = Screen::new("s1", "Berlin", ScreenCategory::Airport, 500.0, 4.0);

        let fresh = vec![interaction("u1", &screen, InteractionDetail::Favorite, now)];
        let stale = vec![interaction(
            "u1",
            &screen,
            InteractionDetail::Favorite,
            now - Duration::days(60),
        )];

        let fresh_score = build_profile("u1", &fresh, now, &config).preferred_categories[0].score;
        let stale_score = build_profile("u1", &stale, now, &config).preferred_categories[0].score;
        assert!(fresh_score > stale_score);
    }

    #[tokio::test]
    async fn test_profile_invalidated_on_new_interaction() {
        let (store, clock) = store();
        let screen = Screen::new("s1", "Berlin", ScreenCategory::Mall, 100.0, 4.0);

        store
            .record_interaction(interaction("u1", &screen, InteractionDetail::Favorite, clock.now()))
            .await
            .unwrap();
        assert_eq!(store.get_profile("u1").await.interactions.total, 1);

        store
            .record_interaction(interaction("u1", &screen, InteractionDetail::Favorite, clock.now()))
            .await
            .unwrap();
        assert_eq!(store.get_profile("u1").await.interactions.total, 2);
    }

    #[tokio::test]
    async fn test_log_is_capped() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = UserBehaviorStore::new(
            clock.clone(),
            BehaviorStoreConfig {
                max_interactions_per_user: 3,
                ..Default::default()
            },
        );
        let screen = Screen::new("s1", "Berlin", ScreenCategory::Mall, 100.0, 4.0);
        for _ in 0..5 {
            store
                .record_interaction(interaction(
                    "u1",
                    &screen,
                    InteractionDetail::View { duration_secs: None },
                    clock.now(),
                ))
                .await
                .unwrap();
        }
        assert_eq!(store.interaction_count("u1"), 3);
    }

    #[tokio::test]
    async fn test_rejects_anonymous_interaction() {
        let (store, clock) = store();
        let screen = Screen::new("s1", "Berlin", ScreenCategory::Mall, 100.0, 4.0);
        let result = store
            .record_interaction(interaction("", &screen, InteractionDetail::Favorite, clock.now()))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_recent_screens_are_distinct_and_ordered() {
        let (store, clock) = store();
        let a = Screen::new("a", "Berlin", ScreenCategory::Mall, 100.0, 4.0);
        let b = Screen::new("b", "Berlin", ScreenCategory::Mall, 100.0, 4.0);

        store
            .record_interaction(interaction("u1", &a, InteractionDetail::Favorite, clock.now()))
            .await
            .unwrap();
        clock.advance(Duration::minutes(1));
        store
            .record_interaction(interaction("u1", &b, InteractionDetail::Favorite, clock.now()))
            .await
            .unwrap();
        clock.advance(Duration::minutes(1));
        store
            .record_interaction(interaction("u1", &a, InteractionDetail::Favorite, clock.now()))
            .await
            .unwrap();

        let profile = store.get_profile("u1").await;
        let ids: Vec<_> = profile.recent_screens.iter().map(|s| s.screen_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.users_who_interacted_with("b"), vec!["u1".to_string()]);
    }
}
