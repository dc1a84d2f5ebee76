// Search input and listing records shared by every stage of the pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MARKETPLACE_BASE_URL: &str = "https://www.facebook.com/marketplace";

pub const DEFAULT_RESULT_LIMIT: usize = 20;

// What the caller is looking for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub query: String,
    pub location: Option<String>,
    pub radius_miles: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub category: Option<String>,
    pub limit: usize,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self {
            query: String::new(),
            location: None,
            radius_miles: None,
            min_price: None,
            max_price: None,
            category: None,
            limit: DEFAULT_RESULT_LIMIT,
        }
    }
}

impl SearchCriteria {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_radius(mut self, miles: f64) -> Self {
        self.radius_miles = Some(miles);
        self
    }

    pub fn with_price_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_price = min;
        self.max_price = max;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Cache key over a normalized projection of the criteria. Text fields are
    /// trimmed and lower-cased so cosmetic differences share one entry.
    pub fn cache_key(&self) -> String {
        fn text(value: Option<&str>) -> String {
            value.map(|v| v.trim().to_lowercase()).unwrap_or_default()
        }
        fn number(value: Option<f64>) -> String {
            value.map(|v| v.to_string()).unwrap_or_default()
        }

        format!(
            "search:{}:{}:{}:{}:{}:{}:{}",
            self.query.trim().to_lowercase(),
            text(self.location.as_deref()),
            number(self.radius_miles),
            number(self.min_price),
            number(self.max_price),
            text(self.category.as_deref()),
            self.limit
        )
    }

    /// Lower-cased query tokens longer than two characters.
    pub fn keywords(&self) -> Vec<String> {
        self.query
            .split_whitespace()
            .map(|word| word.to_lowercase())
            .filter(|word| word.chars().count() > 2)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "EUR")]
    Eur,
    #[serde(rename = "GBP")]
    Gbp,
    #[serde(rename = "JPY")]
    Jpy,
    #[serde(rename = "INR")]
    Inr,
    #[serde(rename = "RUB")]
    Rub,
    #[serde(rename = "KRW")]
    Krw,
    #[serde(rename = "CAD")]
    Cad,
    #[serde(rename = "AUD")]
    Aud,
}

impl Currency {
    /// Maps a price symbol to its currency. Anything unrecognized is USD.
    pub fn from_symbol(symbol: &str) -> Self {
        match symbol.trim() {
            "C$" => Currency::Cad,
            "A$" => Currency::Aud,
            "€" => Currency::Eur,
            "£" => Currency::Gbp,
            "¥" => Currency::Jpy,
            "₹" => Currency::Inr,
            "₽" => Currency::Rub,
            "₩" => Currency::Krw,
            _ => Currency::Usd,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Jpy => "JPY",
            Currency::Inr => "INR",
            Currency::Rub => "RUB",
            Currency::Krw => "KRW",
            Currency::Cad => "CAD",
            Currency::Aud => "AUD",
        }
    }

    pub fn is_symbol_char(c: char) -> bool {
        matches!(c, '$' | '€' | '£' | '¥' | '₹' | '₽' | '₩')
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SellerSummary {
    pub name: Option<String>,
    // raw text such as "4.8 ★"
    pub rating: Option<String>,
    // raw text such as "2019" or "March 2020"
    pub joined: Option<String>,
    pub profile_url: Option<String>,
}

impl SellerSummary {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.rating.is_none()
            && self.joined.is_none()
            && self.profile_url.is_none()
    }
}

/// One marketplace item, parsed from provider HTML or synthesized.
///
/// Only `id` and `url` are guaranteed to be populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub price: Option<f64>,
    pub currency: Option<Currency>,
    pub location: Option<String>,
    pub distance_miles: Option<f64>,
    pub url: String,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub condition: Option<String>,
    pub seller: Option<SellerSummary>,
    pub posted_at: Option<DateTime<Utc>>,
}

impl Listing {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            url: Self::canonical_url(&id),
            id,
            ..Default::default()
        }
    }

    pub fn canonical_url(id: &str) -> String {
        format!("{}/item/{}/", MARKETPLACE_BASE_URL, id)
    }
}
