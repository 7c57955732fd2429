// ============================================
// Section Engagement Tracking
// ============================================
//
// Appends section-level events to a capped log in the store and aggregates
// them into per-section click-through and conversion rates.

use crate::error::Result;
use crate::metrics;
use chrono::{DateTime, Utc};
use marketplace_cache::{CacheKey, TypedCache};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_MAX_EVENTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementAction {
    Impression,
    Click,
    Purchase,
    Dismiss,
}

impl EngagementAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementAction::Impression => "impression",
            EngagementAction::Click => "click",
            EngagementAction::Purchase => "purchase",
            EngagementAction::Dismiss => "dismiss",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionEngagementEvent {
    pub section_id: String,
    pub action: EngagementAction,
    pub user_id: Option<String>,
    pub screen_id: Option<String>,
    /// Tracking id from the section metadata
    pub tracking_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl SectionEngagementEvent {
    pub fn new(section_id: impl Into<String>, action: EngagementAction, timestamp: DateTime<Utc>) -> Self {
        Self {
            section_id: section_id.into(),
            action,
            user_id: None,
            screen_id: None,
            tracking_id: None,
            timestamp,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_screen(mut self, screen_id: impl Into<String>) -> Self {
        self.screen_id = Some(screen_id.into());
        self
    }

    pub fn with_tracking_id(mut self, tracking_id: Uuid) -> Self {
        self.tracking_id = Some(tracking_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SectionStats {
    pub section_id: String,
    pub impressions: u64,
    pub clicks: u64,
    pub purchases: u64,
    pub dismissals: u64,
    /// clicks / impressions
    pub ctr: f64,
    /// purchases / clicks
    pub conversion_rate: f64,
}

impl SectionStats {
    fn add(&mut self, action: EngagementAction) {
        match action {
            EngagementAction::Impression => self.impressions += 1,
            EngagementAction::Click => self.clicks += 1,
            EngagementAction::Purchase => self.purchases += 1,
            EngagementAction::Dismiss => self.dismissals += 1,
        }
    }

    fn finish(mut self) -> Self {
        self.ctr = ratio(self.clicks, self.impressions);
        self.conversion_rate = ratio(self.purchases, self.clicks);
        self
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        (numerator as f64 / denominator as f64).clamp(0.0, 1.0)
    }
}

pub struct EngagementTracker {
    cache: TypedCache,
    max_events: usize,
    // Serialises read-modify-write of the log
    write_lock: Mutex<()>,
}

impl EngagementTracker {
    pub fn new(cache: TypedCache) -> Self {
        Self::with_capacity(cache, DEFAULT_MAX_EVENTS)
    }

    pub fn with_capacity(cache: TypedCache, max_events: usize) -> Self {
        Self {
            cache,
            max_events: max_events.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn track(&self, event: SectionEngagementEvent) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = CacheKey::engagement_log();

        let mut events: Vec<SectionEngagementEvent> = self.cache.get(&key).await?.unwrap_or_default();
        metrics::record_engagement(event.action.as_str());
        debug!(
            section_id = %event.section_id,
            action = event.action.as_str(),
            "Tracked section engagement"
        );
        events.push(event);
        if events.len() > self.max_events {
            let overflow = events.len() - self.max_events;
            events.drain(..overflow);
        }

        self.cache.set(&key, &events, None).await?;
        Ok(())
    }

    pub async fn events(&self) -> Result<Vec<SectionEngagementEvent>> {
        Ok(self
            .cache
            .get(&CacheKey::engagement_log())
            .await?
            .unwrap_or_default())
    }

    pub async fn stats(&self, section_id: &str) -> Result<SectionStats> {
        let mut stats = SectionStats {
            section_id: section_id.to_string(),
            ..Default::default()
        };
        for event in self.events().await? {
            if event.section_id == section_id {
                stats.add(event.action);
            }
        }
        Ok(stats.finish())
    }

    pub async fn all_stats(&self) -> Result<BTreeMap<String, SectionStats>> {
        let mut all: BTreeMap<String, SectionStats> = BTreeMap::new();
        for event in self.events().await? {
            all.entry(event.section_id.clone())
                .or_insert_with(|| SectionStats {
                    section_id: event.section_id.clone(),
                    ..Default::default()
                })
                .add(event.action);
        }
        Ok(all.into_iter().map(|(id, s)| (id, s.finish())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketplace_cache::MemoryStore;
    use std::sync::Arc;

    fn tracker(capacity: usize) -> EngagementTracker {
        EngagementTracker::with_capacity(TypedCache::new(Arc::new(MemoryStore::new())), capacity)
    }

    #[tokio::test]
    async fn test_stats_rates() {
        let tracker = tracker(100);
        let now = Utc::now();
        for action in [
            EngagementAction::Impression,
            EngagementAction::Impression,
            EngagementAction::Impression,
            EngagementAction::Impression,
            EngagementAction::Click,
            EngagementAction::Click,
            EngagementAction::Purchase,
            EngagementAction::Dismiss,
        ] {
            tracker
                .track(SectionEngagementEvent::new("trending", action, now).with_user("u1"))
                .await
                .unwrap();
        }
        tracker
            .track(SectionEngagementEvent::new("popular", EngagementAction::Impression, now))
            .await
            .unwrap();

        let stats = tracker.stats("trending").await.unwrap();
        assert_eq!(stats.impressions, 4);
        assert_eq!(stats.ctr, 0.5);
        assert_eq!(stats.conversion_rate, 0.5);
        assert_eq!(stats.dismissals, 1);

        let all = tracker.all_stats().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["popular"].ctr, 0.0);
    }

    #[tokio::test]
    async fn test_log_is_capped() {
        let tracker = tracker(3);
        let now = Utc::now();
        for i in 0..5 {
            tracker
                .track(
                    SectionEngagementEvent::new("s", EngagementAction::Click, now)
                        .with_screen(format!("screen-{}", i)),
                )
                .await
                .unwrap();
        }
        let events = tracker.events().await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].screen_id.as_deref(), Some("screen-2"));
    }

    #[test]
    fn test_unknown_section_has_zero_stats() {
        let tracker = tracker(10);
        let stats = tokio_test::block_on(tracker.stats("nothing"));
        let stats = tokio_test::assert_ok!(stats);
        assert_eq!(stats.impressions, 0);
        assert_eq!(stats.ctr, 0.0);
    }
}
