// Placeholder listings served when a search page yields nothing parseable or
// no provider is configured. Output is a pure function of the criteria, the
// generator's salt and `now`.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use crate::listing::{Currency, Listing, SearchCriteria, SellerSummary, MARKETPLACE_BASE_URL};

pub const MAX_SYNTHETIC_RESULTS: usize = 20;

const DEFAULT_MIN_PRICE: f64 = 10.0;
const DEFAULT_PRICE_SPAN: f64 = 500.0;
const DEFAULT_MAX_DISTANCE: f64 = 25.0;
// posted within the last three days
const MAX_AGE_MINUTES: i64 = 72 * 60;

const TITLE_PREFIXES: &[&str] = &[
    "Like new",
    "Gently used",
    "Vintage",
    "Barely used",
    "Great condition",
    "Moving sale:",
];

const CITIES: &[&str] = &[
    "Austin, TX",
    "Portland, OR",
    "Denver, CO",
    "Brooklyn, NY",
    "Oakland, CA",
    "Chicago, IL",
    "Seattle, WA",
    "Atlanta, GA",
];

const CONDITIONS: &[&str] = &["New", "Used - Like New", "Used - Good", "Used - Fair"];

const SELLER_NAMES: &[&str] = &[
    "Alex Morgan",
    "Jamie Chen",
    "Riley Patel",
    "Sam Okafor",
    "Taylor Brooks",
    "Jordan Reyes",
];

#[derive(Debug, Clone, Default)]
pub struct SyntheticListings {
    salt: u64,
}

impl SyntheticListings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mixes `salt` into every seed, so two generators with different salts
    /// produce different listings for the same criteria.
    pub fn with_seed(salt: u64) -> Self {
        Self { salt }
    }

    // FNV-1a over the normalized query and price bounds
    fn seed_for(&self, criteria: &SearchCriteria) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        let mut feed = |bytes: &[u8]| {
            for byte in bytes {
                hash ^= *byte as u64;
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
        };

        feed(criteria.query.trim().to_lowercase().as_bytes());
        feed(&criteria.min_price.unwrap_or(-1.0).to_bits().to_le_bytes());
        feed(&criteria.max_price.unwrap_or(-1.0).to_bits().to_le_bytes());

        hash ^ self.salt
    }

    fn price_bounds(criteria: &SearchCriteria) -> (f64, f64) {
        let lo = criteria
            .min_price
            .filter(|p| p.is_finite())
            .unwrap_or(DEFAULT_MIN_PRICE)
            .max(0.0);
        let hi = criteria
            .max_price
            .filter(|p| p.is_finite())
            .unwrap_or(lo + DEFAULT_PRICE_SPAN)
            .max(lo);
        (lo, hi)
    }

    /// Generates `min(criteria.limit, 20)` plausible listings whose titles
    /// contain the query and whose prices fall inside the requested range.
    pub fn generate(&self, criteria: &SearchCriteria, now: DateTime<Utc>) -> Vec<Listing> {
        let seed = self.seed_for(criteria);
        let mut rng = StdRng::seed_from_u64(seed);

        let count = criteria.limit.min(MAX_SYNTHETIC_RESULTS);
        let query = criteria.query.trim();
        let (lo, hi) = Self::price_bounds(criteria);
        let max_distance = criteria
            .radius_miles
            .filter(|r| r.is_finite() && *r > 0.5)
            .unwrap_or(DEFAULT_MAX_DISTANCE);
        let base_id = 900_000_000_000_000u64 + (seed % 1_000_000_000_000) * 100;

        (0..count)
            .map(|i| {
                let id = (base_id + i as u64).to_string();
                let mut listing = Listing::new(id.clone());

                let prefix = TITLE_PREFIXES.choose(&mut rng).copied().unwrap_or("Used");
                listing.title = format!("{} {}", prefix, query);

                let price = (lo + rng.gen::<f64>() * (hi - lo)).round().clamp(lo, hi);
                listing.price = Some(price);
                listing.currency = Some(Currency::Usd);

                let location = match criteria.location.as_deref() {
                    Some(location) if !location.trim().is_empty() => location.trim().to_string(),
                    _ => CITIES.choose(&mut rng).copied().unwrap_or("Austin, TX").to_string(),
                };
                listing.distance_miles =
                    Some((rng.gen_range(0.5..=max_distance) * 10.0).round() / 10.0);

                let condition = CONDITIONS.choose(&mut rng).copied().unwrap_or("Used - Good");
                listing.description = Some(format!(
                    "{} {} in {} condition. Pickup in {}, cash or app payment.",
                    prefix,
                    query,
                    condition.to_lowercase(),
                    location
                ));
                listing.condition = Some(condition.to_string());
                listing.category = criteria.category.clone();
                listing.location = Some(location);

                let seller_id = 100_000_000 + rng.gen_range(0..900_000_000u64);
                listing.seller = Some(SellerSummary {
                    name: SELLER_NAMES.choose(&mut rng).map(|name| name.to_string()),
                    rating: Some(format!("{:.1} ★", rng.gen_range(3.5..=5.0))),
                    joined: Some((now.year() - rng.gen_range(0..=10)).to_string()),
                    profile_url: Some(format!("{}/profile/{}/", MARKETPLACE_BASE_URL, seller_id)),
                });

                listing.posted_at =
                    Some(now - ChronoDuration::minutes(rng.gen_range(5..=MAX_AGE_MINUTES)));
                listing
            })
            .collect()
    }
}
