// ============================================
// Catalog Provider
// ============================================
//
// Source of the full screen inventory. Raw feed entries are validated here
// once; everything downstream works with typed `Screen` values.

use crate::error::CatalogError;
use crate::models::{RawScreen, Screen, ScreenCategory};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn list_screens(&self) -> Result<Vec<Screen>, CatalogError>;
}

/// Catalog held in memory, replaceable at runtime
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    screens: Arc<RwLock<Vec<Screen>>>,
}

impl InMemoryCatalog {
    pub fn new(screens: Vec<Screen>) -> Self {
        Self {
            screens: Arc::new(RwLock::new(screens)),
        }
    }

    /// Validate raw feed entries, skipping the ones that fail
    pub fn from_raw(raw: Vec<RawScreen>) -> Self {
        let total = raw.len();
        let screens: Vec<Screen> = raw
            .into_iter()
            .filter_map(|entry| match Screen::try_from(entry) {
                Ok(screen) => Some(screen),
                Err(e) => {
                    warn!(error = %e, "Rejected catalog entry");
                    None
                }
            })
            .collect();

        info!(
            accepted = screens.len(),
            rejected = total - screens.len(),
            "Catalog loaded"
        );
        Self::new(screens)
    }

    /// Parse a JSON array of raw screens
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let raw: Vec<RawScreen> = serde_json::from_str(json)
            .map_err(|e| CatalogError::Unavailable(format!("malformed catalog: {}", e)))?;
        Ok(Self::from_raw(raw))
    }

    pub async fn replace(&self, screens: Vec<Screen>) {
        *self.screens.write().await = screens;
    }
}

#[async_trait]
impl CatalogProvider for InMemoryCatalog {
    async fn list_screens(&self) -> Result<Vec<Screen>, CatalogError> {
        Ok(self.screens.read().await.clone())
    }
}

/// Deterministic sample inventory spread over a handful of cities
pub fn demo_catalog(count: usize) -> Vec<Screen> {
    const CITIES: [(&str, &str); 5] = [
        ("Berlin", "Berlin"),
        ("Munich", "Bavaria"),
        ("Hamburg", "Hamburg"),
        ("Cologne", "North Rhine-Westphalia"),
        ("Frankfurt", "Hesse"),
    ];
    const CATEGORIES: [ScreenCategory; 7] = [
        ScreenCategory::Billboard,
        ScreenCategory::DigitalDisplay,
        ScreenCategory::Transit,
        ScreenCategory::Mall,
        ScreenCategory::Airport,
        ScreenCategory::StreetFurniture,
        ScreenCategory::Stadium,
    ];

    let now = Utc::now();
    (0..count)
        .map(|i| {
            let (city, region) = CITIES[i % CITIES.len()];
            let category = CATEGORIES[(i / 2) % CATEGORIES.len()].clone();
            let price = 80.0 + ((i * 37) % 20) as f64 * 45.0;
            let rating = 3.0 + ((i * 7) % 21) as f64 / 10.0;

            let mut screen = Screen::new(format!("screen-{:03}", i + 1), city, category, price, rating)
                .with_impressions(2_000 + ((i * 1_337) % 60_000) as u64)
                .with_created_at(now - Duration::days((i % 90) as i64));
            screen.name = format!("{} {} #{}", city, screen.category, i + 1);
            screen.location.region = region.to_string();
            screen
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_json_skips_invalid_entries() {
        let json = r#"[
            {"id": "s1", "city": "Berlin", "price": 120.0, "category": "mall", "rating": 4.5},
            {"id": "s2", "city": "Berlin", "rating": 4.0},
            {"id": "s3", "city": "Munich", "price": 80.0, "rating": 9.0}
        ]"#;

        let catalog = InMemoryCatalog::from_json(json).unwrap();
        let screens = catalog.list_screens().await.unwrap();
        assert_eq!(screens.len(), 1);
        assert_eq!(screens[0].id, "s1");
    }

    #[tokio::test]
    async fn test_malformed_json_is_unavailable() {
        assert!(matches!(
            InMemoryCatalog::from_json("{"),
            Err(CatalogError::Unavailable(_))
        ));
    }

    #[test]
    fn test_demo_catalog_is_valid_and_unique() {
        let screens = demo_catalog(40);
        assert_eq!(screens.len(), 40);
        let ids: std::collections::HashSet<_> = screens.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids.len(), 40);
        assert!(screens
            .iter()
            .all(|s| s.price_per_day > 0.0 && (0.0..=5.0).contains(&s.rating)));
    }
}
