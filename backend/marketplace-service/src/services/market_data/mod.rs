// ============================================
// Market Data Provider (市場數據)
// ============================================
//
// Per-screen performance signals: booking rate, engagement, conversion,
// impressions and trend direction.
//
// Baseline values are simulated from a generator seeded by the screen id, so
// the same screen always starts from the same numbers. Observed interaction
// velocity from the behavior store is blended on top.
//
// Results are cached with a TTL: identical calls inside the window return
// identical values.

use crate::error::Result;
use crate::models::{PerformanceMetrics, Screen, TrendDirection, Interaction};
use crate::services::behavior::UserBehaviorStore;
use crate::services::catalog::CatalogProvider;
use crate::utils::{desc, saturate, stable_hash};
use chrono::{DateTime, Duration, Utc};
use marketplace_cache::{CacheKey, Clock, TypedCache};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const PEAK_HOUR_POOL: [u8; 10] = [7, 8, 9, 12, 13, 16, 17, 18, 19, 20];

#[derive(Debug, Clone)]
pub struct MarketDataConfig {
    pub cache_ttl: Duration,
    pub trending_window_days: u32,
    /// Weighted interactions at which observed velocity reaches ~63%
    pub velocity_scale: f64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            cache_ttl: marketplace_cache::ttl::market_data(),
            trending_window_days: 7,
            velocity_scale: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingScreen {
    pub screen: Screen,
    pub trending_score: f64,
    /// Weighted interactions observed inside the window
    pub velocity: f64,
    pub trend: TrendDirection,
    pub window_days: u32,
}

pub struct MarketDataProvider {
    catalog: Arc<dyn CatalogProvider>,
    behavior: Arc<UserBehaviorStore>,
    cache: TypedCache,
    clock: Arc<dyn Clock>,
    config: MarketDataConfig,
}

impl MarketDataProvider {
    pub fn new(
        catalog: Arc<dyn CatalogProvider>,
        behavior: Arc<UserBehaviorStore>,
        cache: TypedCache,
        clock: Arc<dyn Clock>,
        config: MarketDataConfig,
    ) -> Self {
        Self {
            catalog,
            behavior,
            cache,
            clock,
            config,
        }
    }

    pub fn default_window_days(&self) -> u32 {
        self.config.trending_window_days
    }

    /// Screens ranked by trending score, optionally restricted to a city or region
    pub async fn get_trending(
        &self,
        location: Option<&str>,
        window_days: u32,
    ) -> Result<Vec<TrendingScreen>> {
        let key = CacheKey::trending(location, window_days);
        if let Some(cached) = self.cached::<Vec<TrendingScreen>>(&key).await {
            return Ok(cached);
        }

        let now = self.clock.now();
        let observed = self.observed_since(now - Duration::days(window_days as i64));
        let screens = self.catalog.list_screens().await?;

        let mut trending: Vec<TrendingScreen> = Vec::new();
        for screen in screens
            .into_iter()
            .filter(|s| location.map_or(true, |loc| s.in_city(loc)))
        {
            let activity = observed.get(screen.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            let metrics = self.metrics_with(&screen, activity, now, window_days).await;
            let velocity = weighted_velocity(activity);
            let trend_bonus = match metrics.trend {
                TrendDirection::Up => 1.0,
                TrendDirection::Stable => 0.5,
                TrendDirection::Down => 0.0,
            };
            let trending_score = (0.5 * saturate(velocity, self.config.velocity_scale)
                + 0.3 * metrics.booking_rate
                + 0.2 * trend_bonus)
                .clamp(0.0, 1.0);

            trending.push(TrendingScreen {
                screen,
                trending_score,
                velocity,
                trend: metrics.trend,
                window_days,
            });
        }
        trending.sort_by(|a, b| {
            desc(a.trending_score, b.trending_score).then_with(|| a.screen.id.cmp(&b.screen.id))
        });

        self.store(&key, &trending).await;
        debug!(location = ?location, window_days, count = trending.len(), "Computed trending screens");
        Ok(trending)
    }

    pub async fn get_performance_metrics(&self, screen: &Screen) -> PerformanceMetrics {
        let now = self.clock.now();
        let window = self.config.trending_window_days;
        let observed = self.observed_since(now - Duration::days(window as i64));
        let activity = observed.get(screen.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        self.metrics_with(screen, activity, now, window).await
    }

    /// Metrics for a batch of screens, keyed by screen id
    pub async fn metrics_for(&self, screens: &[Screen]) -> HashMap<String, PerformanceMetrics> {
        let now = self.clock.now();
        let window = self.config.trending_window_days;
        let observed = self.observed_since(now - Duration::days(window as i64));

        let mut metrics = HashMap::with_capacity(screens.len());
        for screen in screens {
            let activity = observed.get(screen.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            metrics.insert(
                screen.id.clone(),
                self.metrics_with(screen, activity, now, window).await,
            );
        }
        metrics
    }

    /// Highest composite performance first
    pub async fn get_top_performing(
        &self,
        location: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(Screen, PerformanceMetrics)>> {
        let screens: Vec<Screen> = self
            .catalog
            .list_screens()
            .await?
            .into_iter()
            .filter(|s| location.map_or(true, |loc| s.in_city(loc)))
            .collect();

        let mut metrics = self.metrics_for(&screens).await;
        let mut ranked: Vec<(Screen, PerformanceMetrics)> = screens
            .into_iter()
            .filter_map(|s| metrics.remove(&s.id).map(|m| (s, m)))
            .collect();
        ranked.sort_by(|a, b| {
            desc(a.1.composite(), b.1.composite()).then_with(|| a.0.id.cmp(&b.0.id))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }

    async fn metrics_with(
        &self,
        screen: &Screen,
        activity: &[Interaction],
        now: DateTime<Utc>,
        window_days: u32,
    ) -> PerformanceMetrics {
        let key = CacheKey::performance_metrics(&screen.id);
        if let Some(cached) = self.cached::<PerformanceMetrics>(&key).await {
            return cached;
        }

        let metrics = simulate_metrics(screen, activity, now, window_days, self.config.velocity_scale);
        self.store(&key, &metrics).await;
        metrics
    }

    fn observed_since(&self, cutoff: DateTime<Utc>) -> HashMap<String, Vec<Interaction>> {
        let mut by_screen: HashMap<String, Vec<Interaction>> = HashMap::new();
        for interaction in self.behavior.interactions_since(cutoff) {
            by_screen
                .entry(interaction.screen_id.clone())
                .or_default()
                .push(interaction);
        }
        by_screen
    }

    async fn cached<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get::<T>(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Market data cache read failed");
                None
            }
        }
    }

    async fn store<T: Serialize + Sync>(&self, key: &str, value: &T) {
        if let Err(e) = self.cache.set(key, value, Some(self.config.cache_ttl)).await {
            warn!(key = %key, error = %e, "Market data cache write failed");
        }
    }
}

fn weighted_velocity(activity: &[Interaction]) -> f64 {
    activity.iter().map(|i| i.action().weight()).sum()
}

/// Seeded baseline blended with observed activity
pub fn simulate_metrics(
    screen: &Screen,
    activity: &[Interaction],
    now: DateTime<Utc>,
    window_days: u32,
    velocity_scale: f64,
) -> PerformanceMetrics {
    let mut rng = StdRng::seed_from_u64(stable_hash(&screen.id));

    let base_booking: f64 = rng.gen_range(0.1..0.9);
    let base_engagement: f64 = rng.gen_range(0.2..0.95);
    let base_conversion: f64 = rng.gen_range(0.01..0.15);
    let simulated_trend = match rng.gen_range(0..3) {
        0 => TrendDirection::Up,
        1 => TrendDirection::Stable,
        _ => TrendDirection::Down,
    };
    let mut peak_hours: Vec<u8> = PEAK_HOUR_POOL.choose_multiple(&mut rng, 3).copied().collect();
    peak_hours.sort_unstable();

    let observed = saturate(weighted_velocity(activity), velocity_scale);
    let purchases = activity
        .iter()
        .filter(|i| i.action() == crate::models::InteractionAction::Purchase)
        .count() as f64;
    let observed_conversion = if activity.is_empty() {
        0.0
    } else {
        purchases / activity.len() as f64
    };

    let trend = if activity.is_empty() {
        simulated_trend
    } else {
        observed_trend(activity, now, window_days)
    };

    let booking_rate = (0.8 * base_booking + 0.2 * observed).clamp(0.0, 1.0);
    let impressions = if screen.daily_impressions > 0 {
        screen.daily_impressions
    } else {
        rng.gen_range(1_000..40_000)
    };

    PerformanceMetrics {
        screen_id: screen.id.clone(),
        booking_rate,
        engagement_score: (0.7 * base_engagement + 0.3 * observed).clamp(0.0, 1.0),
        conversion_rate: (0.7 * base_conversion + 0.3 * observed_conversion).clamp(0.0, 1.0),
        impressions,
        revenue: screen.price_per_day * booking_rate * 30.0,
        trend,
        peak_hours,
    }
}

/// Compares activity in the recent half of the window with the older half
fn observed_trend(activity: &[Interaction], now: DateTime<Utc>, window_days: u32) -> TrendDirection {
    let midpoint = now - Duration::hours(window_days as i64 * 12);
    let (recent, older): (Vec<&Interaction>, Vec<&Interaction>) =
        activity.iter().partition(|i| i.timestamp >= midpoint);
    let recent: f64 = recent.iter().map(|i| i.action().weight()).sum();
    let older: f64 = older.iter().map(|i| i.action().weight()).sum();

    if recent > older * 1.2 {
        TrendDirection::Up
    } else if recent < older * 0.8 {
        TrendDirection::Down
    } else {
        TrendDirection::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InteractionDetail, ScreenCategory};
    use crate::services::behavior::BehaviorStoreConfig;
    use crate::services::catalog::{demo_catalog, InMemoryCatalog};
    use marketplace_cache::{ManualClock, MemoryStore};

    fn provider() -> (MarketDataProvider, Arc<UserBehaviorStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let behavior = Arc::new(UserBehaviorStore::new(clock.clone(), BehaviorStoreConfig::default()));
        let cache = TypedCache::new(Arc::new(MemoryStore::with_clock(clock.clone())));
        let catalog = Arc::new(InMemoryCatalog::new(demo_catalog(20)));
        (
            MarketDataProvider::new(
                catalog,
                behavior.clone(),
                cache,
                clock.clone(),
                MarketDataConfig::default(),
            ),
            behavior,
            clock,
        )
    }

    #[test]
    fn test_simulation_is_seeded_by_screen_id() {
        let now = Utc::now();
        let screen = Screen::new("s1", "Berlin", ScreenCategory::Mall, 200.0, 4.0);
        let a = simulate_metrics(&screen, &[], now, 7, 10.0);
        let b = simulate_metrics(&screen, &[], now, 7, 10.0);
        assert_eq!(a, b);
        assert!((0.0..=1.0).contains(&a.booking_rate));
        assert!((0.0..=1.0).contains(&a.engagement_score));
        assert_eq!(a.peak_hours.len(), 3);
    }

    #[test]
    fn test_recent_activity_trends_up() {
        let now = Utc::now();
        let screen = Screen::new("s1", "Berlin", ScreenCategory::Mall, 200.0, 4.0);
        let activity: Vec<Interaction> = (0..4)
            .map(|i| {
                Interaction::new(
                    format!("u{}", i),
                    screen.context(),
                    InteractionDetail::Favorite,
                    now - Duration::hours(i),
                )
            })
            .collect();
        let metrics = simulate_metrics(&screen, &activity, now, 7, 10.0);
        assert_eq!(metrics.trend, TrendDirection::Up);
    }

    #[tokio::test]
    async fn test_trending_cached_within_ttl() {
        let (provider, behavior, clock) = provider();
        let first = provider.get_trending(None, 7).await.unwrap();
        assert_eq!(first.len(), 20);

        // New activity is not visible until the entry expires
        let screens = demo_catalog(20);
        let target = &screens[19];
        for i in 0..10 {
            behavior
                .record_interaction(Interaction::new(
                    format!("u{}", i),
                    target.context(),
                    InteractionDetail::Purchase { amount: 500.0, booking_days: 3 },
                    clock.now(),
                ))
                .await
                .unwrap();
        }
        let second = provider.get_trending(None, 7).await.unwrap();
        assert_eq!(first, second);

        clock.advance(Duration::minutes(6));
        let third = provider.get_trending(None, 7).await.unwrap();
        let boosted = third.iter().find(|t| t.screen.id == target.id).unwrap();
        assert!(boosted.velocity > 0.0);
        assert_eq!(boosted.trend, TrendDirection::Up);
    }

    #[tokio::test]
    async fn test_trending_filters_by_location() {
        let (provider, _, _) = provider();
        let berlin = provider.get_trending(Some("berlin"), 7).await.unwrap();
        assert!(!berlin.is_empty());
        assert!(berlin.iter().all(|t| t.screen.location.city == "Berlin"));
        assert!(berlin
            .windows(2)
            .all(|w| w[0].trending_score >= w[1].trending_score));
    }

    #[tokio::test]
    async fn test_top_performing_limit_and_order() {
        let (provider, _, _) = provider();
        let top = provider.get_top_performing(None, 5).await.unwrap();
        assert_eq!(top.len(), 5);
        assert!(top.windows(2).all(|w| w[0].1.composite() >= w[1].1.composite()));
    }
}
