// Relevance scoring: how well a listing matches the search criteria, 0-100.
// Scores are pure functions of (listing, criteria, now) so cached results rank
// the same way every time.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;

use crate::listing::{Listing, SearchCriteria, SellerSummary};

const BASE_SCORE: f64 = 50.0;
const DEFAULT_RADIUS_MILES: f64 = 25.0;

const NEUTRAL_PRICE: f64 = 10.0;
const NEUTRAL_DISTANCE: f64 = 7.5;
const NEUTRAL_RECENCY: f64 = 7.5;
const NEUTRAL_DESCRIPTION: f64 = 5.0;
const NEUTRAL_SELLER: f64 = 5.0;

static RATING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());
static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(19|20)\d{2}\b").unwrap());

/// Per-factor contributions; `total` is their sum on top of the base,
/// clamped to `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub title: f64,
    pub price: f64,
    pub distance: f64,
    pub recency: f64,
    pub description: f64,
    pub seller: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        (BASE_SCORE
            + self.title
            + self.price
            + self.distance
            + self.recency
            + self.description
            + self.seller)
            .clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredListing {
    pub listing: Listing,
    pub score: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RelevanceScorer;

impl RelevanceScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, listing: &Listing, criteria: &SearchCriteria) -> f64 {
        self.score_at(listing, criteria, Utc::now())
    }

    pub fn score_at(&self, listing: &Listing, criteria: &SearchCriteria, now: DateTime<Utc>) -> f64 {
        self.breakdown_at(listing, criteria, now).total()
    }

    pub fn breakdown_at(
        &self,
        listing: &Listing,
        criteria: &SearchCriteria,
        now: DateTime<Utc>,
    ) -> ScoreBreakdown {
        let keywords = criteria.keywords();

        ScoreBreakdown {
            title: title_score(&listing.title, &criteria.query, &keywords),
            price: price_score(listing.price, criteria.min_price, criteria.max_price),
            distance: distance_score(listing.distance_miles, criteria.radius_miles),
            recency: recency_score(listing.posted_at, now),
            description: description_score(listing.description.as_deref(), &keywords),
            seller: seller_score(listing.seller.as_ref(), now),
        }
    }

    pub fn rank(&self, listings: Vec<Listing>, criteria: &SearchCriteria) -> Vec<ScoredListing> {
        self.rank_at(listings, criteria, Utc::now())
    }

    /// Scores every listing and sorts best first. Ties keep input order.
    pub fn rank_at(
        &self,
        listings: Vec<Listing>,
        criteria: &SearchCriteria,
        now: DateTime<Utc>,
    ) -> Vec<ScoredListing> {
        let mut scored: Vec<ScoredListing> = listings
            .into_iter()
            .map(|listing| {
                let score = self.score_at(&listing, criteria, now);
                ScoredListing { listing, score }
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored
    }
}

fn keyword_fraction(text: &str, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let text = text.to_lowercase();
    let found = keywords.iter().filter(|k| text.contains(k.as_str())).count();
    found as f64 / keywords.len() as f64
}

// 0-30
fn title_score(title: &str, query: &str, keywords: &[String]) -> f64 {
    let query = query.trim().to_lowercase();
    if query.is_empty() || title.is_empty() {
        return 0.0;
    }

    let mut score = 0.0;
    if title.to_lowercase().contains(&query) {
        score += 15.0;
    }
    score + 15.0 * keyword_fraction(title, keywords)
}

// 0-20
fn price_score(price: Option<f64>, min: Option<f64>, max: Option<f64>) -> f64 {
    let Some(price) = price else {
        return NEUTRAL_PRICE;
    };

    match (min, max) {
        (None, None) => NEUTRAL_PRICE,
        (Some(min), None) => {
            if price < min {
                0.0
            } else if price <= min * 1.2 {
                20.0
            } else {
                15.0
            }
        }
        (None, Some(max)) => {
            if price > max {
                0.0
            } else if price <= max * 0.8 {
                20.0
            } else {
                15.0
            }
        }
        (Some(min), Some(max)) => {
            if price < min || price > max {
                0.0
            } else if max <= min {
                20.0
            } else {
                // 20 at the floor down to 10 at the ceiling
                20.0 - 10.0 * (price - min) / (max - min)
            }
        }
    }
}

// 0-15
fn distance_score(distance: Option<f64>, radius: Option<f64>) -> f64 {
    let Some(distance) = distance else {
        return NEUTRAL_DISTANCE;
    };
    let radius = radius.filter(|r| *r > 0.0).unwrap_or(DEFAULT_RADIUS_MILES);

    match distance / radius {
        r if r <= 0.2 => 15.0,
        r if r <= 0.5 => 12.0,
        r if r <= 0.8 => 9.0,
        r if r <= 1.0 => 6.0,
        _ => 0.0,
    }
}

// 0-15
fn recency_score(posted_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(posted_at) = posted_at else {
        return NEUTRAL_RECENCY;
    };
    let age_hours = (now - posted_at).num_seconds() as f64 / 3600.0;

    match age_hours {
        h if h < 6.0 => 15.0,
        h if h < 24.0 => 12.0,
        h if h < 72.0 => 9.0,
        h if h < 168.0 => 6.0,
        _ => 3.0,
    }
}

// 0-10
fn description_score(description: Option<&str>, keywords: &[String]) -> f64 {
    let Some(description) = description.filter(|d| !d.trim().is_empty()) else {
        return NEUTRAL_DESCRIPTION;
    };
    if keywords.is_empty() {
        return NEUTRAL_DESCRIPTION;
    }

    match keyword_fraction(description, keywords) {
        f if f > 0.8 => 10.0,
        f if f > 0.6 => 8.0,
        f if f > 0.4 => 7.0,
        f if f > 0.2 => 6.0,
        _ => NEUTRAL_DESCRIPTION,
    }
}

// 0-10
fn seller_score(seller: Option<&SellerSummary>, now: DateTime<Utc>) -> f64 {
    let Some(seller) = seller else {
        return NEUTRAL_SELLER;
    };
    let mut score = NEUTRAL_SELLER;

    if let Some(rating) = seller.rating.as_deref().and_then(parse_rating) {
        score += match rating {
            r if r >= 4.5 => 5.0,
            r if r >= 4.0 => 4.0,
            r if r >= 3.5 => 3.0,
            r if r >= 3.0 => 2.0,
            r if r >= 2.5 => 1.0,
            _ => -1.0,
        };
    }

    if let Some(joined) = seller.joined.as_deref().and_then(parse_joined) {
        let years = (now.date_naive() - joined).num_days() as f64 / 365.25;
        if years >= 5.0 {
            score += 2.0;
        } else if years >= 2.0 {
            score += 1.0;
        } else if years < 0.25 {
            score -= 1.0;
        }
    }

    score.clamp(0.0, 10.0)
}

pub fn parse_rating(text: &str) -> Option<f64> {
    RATING
        .find(text)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|r| (0.0..=5.0).contains(r))
}

/// Reads join text such as "2019", "in 2019" or "March 2020" as the first day
/// of that month (January when no month is given).
pub fn parse_joined(text: &str) -> Option<NaiveDate> {
    let year: i32 = YEAR.find(text)?.as_str().parse().ok()?;

    let lower = text.to_lowercase();
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let month = lower
        .split(|c: char| !c.is_alphabetic())
        .find_map(|word| {
            let prefix: String = word.chars().take(3).collect();
            MONTHS.iter().position(|m| *m == prefix && word.len() >= 3)
        })
        .map(|idx| idx as u32 + 1)
        .unwrap_or(1);

    NaiveDate::from_ymd_opt(year, month, 1).filter(|d| d.year() == year)
}
