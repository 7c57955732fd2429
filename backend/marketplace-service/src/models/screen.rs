use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use validator::Validate;

/// Screen inventory category
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScreenCategory {
    Billboard,
    DigitalDisplay,
    Transit,
    Mall,
    Airport,
    StreetFurniture,
    Stadium,
    Other(String),
}

impl ScreenCategory {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "billboard" => ScreenCategory::Billboard,
            "digital-display" | "digital" => ScreenCategory::DigitalDisplay,
            "transit" => ScreenCategory::Transit,
            "mall" => ScreenCategory::Mall,
            "airport" => ScreenCategory::Airport,
            "street-furniture" => ScreenCategory::StreetFurniture,
            "stadium" => ScreenCategory::Stadium,
            other => ScreenCategory::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ScreenCategory::Billboard => "billboard",
            ScreenCategory::DigitalDisplay => "digital-display",
            ScreenCategory::Transit => "transit",
            ScreenCategory::Mall => "mall",
            ScreenCategory::Airport => "airport",
            ScreenCategory::StreetFurniture => "street-furniture",
            ScreenCategory::Stadium => "stadium",
            ScreenCategory::Other(name) => name.as_str(),
        }
    }
}

impl fmt::Display for ScreenCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenLocation {
    pub city: String,
    pub region: String,
    pub address: Option<String>,
}

/// Validated inventory item. Only constructed through `TryFrom<RawScreen>`
/// or `Screen::new`, so downstream code never re-checks its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screen {
    pub id: String,
    pub name: String,
    pub location: ScreenLocation,
    pub price_per_day: f64,
    pub category: ScreenCategory,
    /// 0-5 stars
    pub rating: f64,
    pub daily_impressions: u64,
    pub created_at: DateTime<Utc>,
}

/// Screen as delivered by the catalog feed
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RawScreen {
    #[validate(length(min = 1))]
    pub id: Option<String>,
    pub name: Option<String>,
    #[validate(length(min = 1))]
    pub city: Option<String>,
    pub region: Option<String>,
    pub address: Option<String>,
    #[validate(range(exclusive_min = 0.0))]
    pub price: Option<f64>,
    pub category: Option<String>,
    #[validate(range(min = 0.0, max = 5.0))]
    pub rating: Option<f64>,
    pub daily_impressions: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
}

impl TryFrom<RawScreen> for Screen {
    type Error = ValidationError;

    fn try_from(raw: RawScreen) -> Result<Self, Self::Error> {
        raw.validate()
            .map_err(|e| ValidationError::InvalidField(e.to_string()))?;

        let id = raw.id.ok_or(ValidationError::MissingField("id"))?;
        let city = raw.city.ok_or(ValidationError::MissingField("city"))?;
        let price = raw.price.ok_or(ValidationError::MissingField("price"))?;
        if !price.is_finite() {
            return Err(ValidationError::InvalidField(format!(
                "price must be finite for screen {}",
                id
            )));
        }

        Ok(Screen {
            name: raw.name.unwrap_or_else(|| id.clone()),
            location: ScreenLocation {
                region: raw.region.unwrap_or_else(|| city.clone()),
                city,
                address: raw.address,
            },
            price_per_day: price,
            category: raw
                .category
                .as_deref()
                .map(ScreenCategory::parse)
                .unwrap_or(ScreenCategory::Other("uncategorized".to_string())),
            rating: raw.rating.unwrap_or(0.0),
            daily_impressions: raw.daily_impressions.unwrap_or(0),
            created_at: raw.created_at.unwrap_or_else(Utc::now),
            id,
        })
    }
}

impl Screen {
    pub fn new(
        id: impl Into<String>,
        city: impl Into<String>,
        category: ScreenCategory,
        price_per_day: f64,
        rating: f64,
    ) -> Self {
        let id = id.into();
        let city = city.into();
        Self {
            name: id.clone(),
            id,
            location: ScreenLocation {
                region: city.clone(),
                city,
                address: None,
            },
            price_per_day,
            category,
            rating: rating.clamp(0.0, 5.0),
            daily_impressions: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_impressions(mut self, daily_impressions: u64) -> Self {
        self.daily_impressions = daily_impressions;
        self
    }

    pub fn in_city(&self, city: &str) -> bool {
        self.location.city.eq_ignore_ascii_case(city)
            || self.location.region.eq_ignore_ascii_case(city)
    }

    /// Snapshot of the attributes scoring cares about
    pub fn context(&self) -> ScreenContext {
        ScreenContext {
            screen_id: self.id.clone(),
            category: self.category.clone(),
            city: self.location.city.clone(),
            region: self.location.region.clone(),
            price_per_day: self.price_per_day,
            rating: self.rating,
        }
    }

    /// Popularity without any user signal, in [0, 1]
    pub fn popularity(&self) -> f64 {
        let rating = (self.rating / 5.0).clamp(0.0, 1.0);
        let reach = 1.0 - (-(self.daily_impressions as f64) / 50_000.0).exp();
        (0.7 * rating + 0.3 * reach).clamp(0.0, 1.0)
    }
}

/// Screen attributes captured alongside an interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenContext {
    pub screen_id: String,
    pub category: ScreenCategory,
    pub city: String,
    pub region: String,
    pub price_per_day: f64,
    pub rating: f64,
}

/// Price bucket used for diversity checks
pub fn price_band(price: f64) -> u8 {
    match price {
        p if p < 100.0 => 0,
        p if p < 300.0 => 1,
        p if p < 800.0 => 2,
        p if p < 2000.0 => 3,
        _ => 4,
    }
}

/// Catalog filters requested by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenFilters {
    pub city: Option<String>,
    pub category: Option<ScreenCategory>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_rating: Option<f64>,
}

impl ScreenFilters {
    pub fn matches(&self, screen: &Screen) -> bool {
        if let Some(city) = &self.city {
            if !screen.in_city(city) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &screen.category != category {
                return false;
            }
        }
        if let Some(min) = self.min_price {
            if screen.price_per_day < min {
                return false;
            }
        }
        if let Some(max) = self.max_price {
            if screen.price_per_day > max {
                return false;
            }
        }
        if let Some(min) = self.min_rating {
            if screen.rating < min {
                return false;
            }
        }
        true
    }

    /// Stable hash of the filter set, used as a cache key component
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::json!({
            "city": self.city.as_deref().map(str::to_lowercase),
            "category": self.category.as_ref().map(|c| c.as_str().to_string()),
            "min_price": self.min_price,
            "max_price": self.max_price,
            "min_rating": self.min_rating,
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        hex::encode(&digest[..12])
    }
}
