// Marketplace HTML -> Listing records.
//
// Extraction is heuristic: the markup has no stable class names, so cards are
// found through their item links and fields through text shape (currency
// symbols, commas, star glyphs). A card or field that cannot be read is
// dropped; parsing never fails as a whole.

use std::{collections::HashSet, sync::LazyLock};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::listing::{Currency, Listing, SellerSummary};

const FACEBOOK_ORIGIN: &str = "https://www.facebook.com";

// Shortest text that counts as a description on a detail page
const DESCRIPTION_MIN_CHARS: usize = 50;

const DAY_SECS: i64 = 24 * 3600;
// Age phrases beyond a century are prose, not posting times
const MAX_RELATIVE_AGE_SECS: i64 = 100 * 365 * DAY_SECS;

static ITEM_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/marketplace/item/(\d+)").unwrap());

static RELATIVE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(a few|an|a|\d+)\s+(second|minute|min|hour|hr|day|week|month|year)s?\s+ago\b",
    )
    .unwrap()
});

static LOCATION_AFTER_AGO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bago\s+in\s+(.+)$").unwrap());

static CARD_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="/marketplace/item/"]"#).unwrap());
static IMAGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img[src]").unwrap());
static HEADING: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static OG_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static OG_IMAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:image"]"#).unwrap());
static CATEGORY_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="/marketplace/category/"]"#).unwrap());
static PROFILE_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="/marketplace/profile/"]"#).unwrap());

/// One implementation per provider or markup version.
pub trait ListingParser: Send + Sync {
    fn parse_search_results(&self, html: &str) -> Vec<Listing>;

    fn parse_listing_detail(&self, html: &str, listing_id: &str) -> Option<Listing>;
}

/// Parser for the Facebook Marketplace web markup returned by the provider.
#[derive(Debug, Default, Clone)]
pub struct MarketplaceHtmlParser;

impl MarketplaceHtmlParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_card(&self, card: ElementRef<'_>) -> Option<Listing> {
        let href = card.value().attr("href")?;
        let id = extract_item_id(href);
        if id.is_empty() {
            return None;
        }

        let fragments = text_fragments(card);
        let mut listing = Listing::new(id);

        if let Some(title) = fragments.iter().find(|f| !is_price_fragment(f)) {
            listing.title = title.clone();
        }

        if let Some(price_text) = fragments.iter().find(|f| is_price_fragment(f)) {
            let (price, currency) = extract_price_and_currency(price_text);
            listing.price = price;
            listing.currency = currency;
        }

        listing.location = fragments
            .iter()
            .rev()
            .find(|f| f.contains(',') && **f != listing.title)
            .cloned();

        listing.image_url = card
            .select(&IMAGE)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(str::to_string);

        Some(listing)
    }
}

impl ListingParser for MarketplaceHtmlParser {
    fn parse_search_results(&self, html: &str) -> Vec<Listing> {
        if html.trim().is_empty() {
            return vec![];
        }

        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut listings = vec![];

        for card in document.select(&CARD_LINK) {
            match self.parse_card(card) {
                // the same item is often linked from both image and title
                Some(listing) if seen.insert(listing.id.clone()) => listings.push(listing),
                Some(_) => {}
                None => debug!("Skipping marketplace card without an item id"),
            }
        }

        debug!(count = listings.len(), "Parsed marketplace search results");
        listings
    }

    fn parse_listing_detail(&self, html: &str, listing_id: &str) -> Option<Listing> {
        if html.trim().is_empty() {
            return None;
        }

        let document = Html::parse_document(html);
        let fragments = text_fragments(document.root_element());
        if fragments.is_empty() {
            return None;
        }

        let now = Utc::now();
        let mut listing = Listing::new(listing_id);

        listing.title = document
            .select(&HEADING)
            .next()
            .map(|h| normalize_whitespace(&h.text().collect::<String>()))
            .filter(|t| !t.is_empty())
            .or_else(|| meta_content(&document, &OG_TITLE))
            .or_else(|| fragments.iter().find(|f| !is_price_fragment(f)).cloned())
            .unwrap_or_default();

        if let Some(price_text) = fragments.iter().find(|f| is_price_fragment(f)) {
            let (price, currency) = extract_price_and_currency(price_text);
            listing.price = price;
            listing.currency = currency;
        }

        listing.description = fragments
            .iter()
            .find(|f| f.chars().count() > DESCRIPTION_MIN_CHARS && **f != listing.title)
            .cloned();

        listing.category = document
            .select(&CATEGORY_LINK)
            .next()
            .map(|a| normalize_whitespace(&a.text().collect::<String>()))
            .filter(|c| !c.is_empty());

        listing.condition = extract_condition(&fragments);
        listing.seller = extract_seller(&document, &fragments);

        // a "Listed ..." line beats any other age phrase on the page
        let posted = fragments
            .iter()
            .filter(|f| Some(*f) != listing.description.as_ref())
            .filter_map(|f| parse_relative_time(f, now).map(|at| (f, at)))
            .min_by_key(|(f, _)| !f.to_lowercase().starts_with("listed"));
        let posted_text = posted.map(|(text, _)| text);
        if let Some((text, at)) = posted {
            listing.posted_at = Some(at);
            listing.location = LOCATION_AFTER_AGO
                .captures(text)
                .map(|caps| caps[1].trim().to_string());
        }

        if listing.location.is_none() {
            listing.location = fragments
                .iter()
                .rev()
                .find(|f| {
                    f.contains(',')
                        && **f != listing.title
                        && Some(*f) != listing.description.as_ref()
                        && Some(*f) != posted_text
                })
                .cloned();
        }

        listing.image_url = document
            .select(&IMAGE)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(str::to_string)
            .or_else(|| meta_content(&document, &OG_IMAGE));

        Some(listing)
    }
}

/// Pulls the numeric marketplace item id out of a relative or absolute URL.
/// Returns an empty string when the URL is not an item link.
pub fn extract_item_id(url: &str) -> String {
    ITEM_ID
        .captures(url)
        .map(|caps| caps[1].to_string())
        .unwrap_or_default()
}

/// Splits a price string such as `"$1,250"` or `"C$ 80"` into amount and
/// currency. A symbol without digits still resolves the currency.
pub fn extract_price_and_currency(text: &str) -> (Option<f64>, Option<Currency>) {
    let text = text.trim();
    if text.is_empty() {
        return (None, None);
    }

    let numeric: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let price = numeric.parse::<f64>().ok();

    let currency = match text.char_indices().find(|(_, c)| Currency::is_symbol_char(*c)) {
        Some((idx, symbol)) => {
            let prefix = text[..idx].chars().last();
            match (prefix, symbol) {
                (Some(p @ ('C' | 'A')), '$') => Currency::from_symbol(&format!("{}$", p)),
                _ => Currency::from_symbol(&symbol.to_string()),
            }
        }
        None => Currency::Usd,
    };

    (price, Some(currency))
}

/// Converts phrases like "Listed 3 hours ago" into an absolute time.
pub fn parse_relative_time(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = text.to_lowercase();
    if lower.contains("just now") {
        return Some(now);
    }
    if lower.contains("yesterday") {
        return Some(now - Duration::days(1));
    }

    let caps = RELATIVE_TIME.captures(&lower)?;
    let amount: i64 = match &caps[1] {
        "a" | "an" => 1,
        "a few" => 3,
        digits => digits.parse().ok()?,
    };

    let unit_secs: i64 = match &caps[2] {
        "second" => 1,
        "minute" | "min" => 60,
        "hour" | "hr" => 3600,
        "day" => DAY_SECS,
        "week" => 7 * DAY_SECS,
        "month" => 30 * DAY_SECS,
        _ => 365 * DAY_SECS,
    };

    let secs = amount
        .checked_mul(unit_secs)
        .filter(|secs| *secs <= MAX_RELATIVE_AGE_SECS)?;
    now.checked_sub_signed(Duration::seconds(secs))
}

fn is_price_fragment(text: &str) -> bool {
    text.chars().any(Currency::is_symbol_char)
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// Visible text nodes under `root`, whitespace-normalized, empties dropped
fn text_fragments(root: ElementRef<'_>) -> Vec<String> {
    root.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| e.name()));
            if matches!(parent, Some("script" | "style" | "noscript" | "title")) {
                return None;
            }

            let normalized = normalize_whitespace(text);
            (!normalized.is_empty()).then_some(normalized)
        })
        .collect()
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .and_then(|meta| meta.value().attr("content"))
        .map(normalize_whitespace)
        .filter(|c| !c.is_empty())
}

fn absolutize(href: &str) -> Option<String> {
    let base = Url::parse(FACEBOOK_ORIGIN).ok()?;
    base.join(href).ok().map(|url| url.to_string())
}

fn extract_condition(fragments: &[String]) -> Option<String> {
    let labelled = fragments
        .windows(2)
        .find(|pair| pair[0].eq_ignore_ascii_case("condition"))
        .map(|pair| pair[1].clone());

    labelled.or_else(|| {
        fragments
            .iter()
            .find(|f| f.starts_with("Used") || f.as_str() == "New")
            .cloned()
    })
}

fn extract_seller(document: &Html, fragments: &[String]) -> Option<SellerSummary> {
    let profile = document.select(&PROFILE_LINK).next();

    let seller = SellerSummary {
        name: profile
            .map(|a| normalize_whitespace(&a.text().collect::<String>()))
            .filter(|n| !n.is_empty()),
        profile_url: profile
            .and_then(|a| a.value().attr("href"))
            .and_then(absolutize),
        rating: fragments.iter().find(|f| f.contains('★')).cloned(),
        joined: fragments.iter().find_map(|f| {
            let rest = f.strip_prefix("Joined")?.trim();
            let rest = rest.strip_prefix("in ").unwrap_or(rest).trim();
            (!rest.is_empty()).then(|| rest.to_string())
        }),
    };

    (!seller.is_empty()).then_some(seller)
}

// A small sample for inline testing
pub const SMALL_SAMPLE_HTML: &str = r#"
<div role="main">
  <div class="x9f619">
    <a href="/marketplace/item/1029384756/?ref=search&amp;referral_code=null" role="link">
      <div><img src="https://scontent.example.net/v/oak-chair.jpg" alt="Oak chair"></div>
      <div>
        <span>$150</span>
        <span>Vintage oak chair</span>
        <span>Brooklyn, NY</span>
      </div>
    </a>
  </div>
</div>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SEARCH_FIXTURE: &str = include_str!("../samples/marketplace_search.html");
    const DETAIL_FIXTURE: &str = include_str!("../samples/marketplace_listing.html");

    #[test]
    fn test_price_extraction_table() {
        assert_eq!(
            extract_price_and_currency("$150"),
            (Some(150.0), Some(Currency::Usd))
        );
        assert_eq!(
            extract_price_and_currency("€120"),
            (Some(120.0), Some(Currency::Eur))
        );
        assert_eq!(
            extract_price_and_currency("£99.99"),
            (Some(99.99), Some(Currency::Gbp))
        );
        assert_eq!(extract_price_and_currency(""), (None, None));
        assert_eq!(extract_price_and_currency("$"), (None, Some(Currency::Usd)));
    }

    #[test]
    fn test_price_extraction_separators_and_prefixed_symbols() {
        assert_eq!(
            extract_price_and_currency("$1,250"),
            (Some(1250.0), Some(Currency::Usd))
        );
        assert_eq!(
            extract_price_and_currency("C$ 80"),
            (Some(80.0), Some(Currency::Cad))
        );
        assert_eq!(
            extract_price_and_currency("A$45.50"),
            (Some(45.5), Some(Currency::Aud))
        );
        assert_eq!(
            extract_price_and_currency("₹2000"),
            (Some(2000.0), Some(Currency::Inr))
        );
    }

    #[test]
    fn test_extract_item_id() {
        assert_eq!(
            extract_item_id("https://www.facebook.com/marketplace/item/123456789/?ref=x"),
            "123456789"
        );
        assert_eq!(extract_item_id("/marketplace/item/42"), "42");
        assert_eq!(extract_item_id("/marketplace/category/furniture"), "");
        assert_eq!(extract_item_id(""), "");
    }

    #[test]
    fn test_parser_tolerates_empty_documents() {
        let parser = MarketplaceHtmlParser::new();
        assert!(parser.parse_search_results("").is_empty());
        assert!(parser.parse_search_results("<div>No results</div>").is_empty());
        assert!(parser.parse_search_results("<<<not html").is_empty());
        assert!(parser.parse_listing_detail("", "1").is_none());
        assert!(parser.parse_listing_detail("   ", "1").is_none());
    }

    #[test]
    fn test_parse_small_sample() {
        let parser = MarketplaceHtmlParser::new();
        let listings = parser.parse_search_results(SMALL_SAMPLE_HTML);

        assert_eq!(listings.len(), 1);
        let listing = &listings[0];
        assert_eq!(listing.id, "1029384756");
        assert_eq!(listing.title, "Vintage oak chair");
        assert_eq!(listing.price, Some(150.0));
        assert_eq!(listing.currency, Some(Currency::Usd));
        assert_eq!(listing.location.as_deref(), Some("Brooklyn, NY"));
        assert_eq!(
            listing.url,
            "https://www.facebook.com/marketplace/item/1029384756/"
        );
        assert_eq!(
            listing.image_url.as_deref(),
            Some("https://scontent.example.net/v/oak-chair.jpg")
        );
    }

    #[test]
    fn test_parse_search_fixture() {
        let parser = MarketplaceHtmlParser::new();
        let listings = parser.parse_search_results(SEARCH_FIXTURE);

        // four cards, one duplicate link, one card without a numeric id
        assert_eq!(listings.len(), 3);
        let ids: Vec<&str> = listings.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["111111111111111", "222222222222222", "333333333333333"]);

        assert_eq!(listings[0].title, "Mid-century walnut dresser");
        assert_eq!(listings[0].price, Some(1250.0));

        assert_eq!(listings[1].currency, Some(Currency::Eur));
        assert_eq!(listings[1].location.as_deref(), Some("Austin, TX"));

        // partial card: no price, no image
        assert_eq!(listings[2].title, "Free moving boxes");
        assert_eq!(listings[2].price, None);
        assert_eq!(listings[2].image_url, None);
    }

    #[test]
    fn test_parse_listing_detail_fixture() {
        let parser = MarketplaceHtmlParser::new();
        let listing = parser
            .parse_listing_detail(DETAIL_FIXTURE, "555555555555555")
            .unwrap();

        assert_eq!(listing.id, "555555555555555");
        assert_eq!(listing.title, "Herman Miller Aeron chair, size B");
        assert_eq!(listing.price, Some(425.0));
        assert_eq!(listing.currency, Some(Currency::Usd));
        assert!(listing
            .description
            .as_deref()
            .unwrap()
            .starts_with("Fully adjustable Aeron"));
        assert_eq!(listing.category.as_deref(), Some("Furniture"));
        assert_eq!(listing.condition.as_deref(), Some("Used - Like New"));
        assert_eq!(listing.location.as_deref(), Some("Oakland, CA"));

        // the description's "3 years ago" must not win over "Listed 2 days ago"
        let age = Utc::now() - listing.posted_at.unwrap();
        assert!(age >= Duration::hours(47) && age <= Duration::hours(49));

        let seller = listing.seller.unwrap();
        assert_eq!(seller.name.as_deref(), Some("Dana Whitfield"));
        assert_eq!(seller.rating.as_deref(), Some("4.9 ★"));
        assert_eq!(seller.joined.as_deref(), Some("2016"));
        assert_eq!(
            seller.profile_url.as_deref(),
            Some("https://www.facebook.com/marketplace/profile/100004242/")
        );
    }

    #[test]
    fn test_parse_listing_detail_without_optional_fields() {
        let parser = MarketplaceHtmlParser::new();
        let listing = parser
            .parse_listing_detail("<html><body><h1>Bike</h1></body></html>", "7")
            .unwrap();

        assert_eq!(listing.title, "Bike");
        assert_eq!(listing.price, None);
        assert!(listing.seller.is_none());
        assert!(listing.posted_at.is_none());
    }

    #[test]
    fn test_listed_line_wins_over_description_age() {
        let html = r#"
<div role="main">
  <h1>Trilobite fossil</h1>
  <p>Genuine specimen, formed about 500000000 years ago in Morocco and bought 3 years ago at a show.</p>
  <span>Listed 2 hours ago in Tucson, AZ</span>
</div>"#;
        let parser = MarketplaceHtmlParser::new();
        let listing = parser.parse_listing_detail(html, "1").unwrap();

        let age = Utc::now() - listing.posted_at.unwrap();
        assert!(age < Duration::hours(24), "posted {:?} ago", age);
        assert_eq!(listing.location.as_deref(), Some("Tucson, AZ"));
    }

    #[test]
    fn test_location_fallback_skips_posted_line() {
        let html = r#"
<div role="main">
  <h1>Road bike</h1>
  <span>Tucson, AZ</span>
  <span>Listed 5 hours ago, pickup only</span>
</div>"#;
        let parser = MarketplaceHtmlParser::new();
        let listing = parser.parse_listing_detail(html, "2").unwrap();

        assert!(listing.posted_at.is_some());
        assert_eq!(listing.location.as_deref(), Some("Tucson, AZ"));
    }

    #[test]
    fn test_relative_time_rejects_huge_ages() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();

        assert_eq!(parse_relative_time("500000000 years ago", now), None);
        assert_eq!(parse_relative_time("9223372036854775807 days ago", now), None);
        assert_eq!(parse_relative_time("99999999999999999999 weeks ago", now), None);
        assert_eq!(
            parse_relative_time("100 years ago", now),
            Some(now - Duration::days(36500))
        );

        let parser = MarketplaceHtmlParser::new();
        let listing = parser
            .parse_listing_detail(
                "<h1>Fossil</h1><p>Formed about 500000000 years ago.</p>",
                "3",
            )
            .unwrap();
        assert_eq!(listing.posted_at, None);
    }

    #[test]
    fn test_parse_relative_time() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();

        assert_eq!(
            parse_relative_time("Listed 3 hours ago in Oakland, CA", now),
            Some(now - Duration::hours(3))
        );
        assert_eq!(
            parse_relative_time("an hour ago", now),
            Some(now - Duration::hours(1))
        );
        assert_eq!(
            parse_relative_time("2 weeks ago", now),
            Some(now - Duration::weeks(2))
        );
        assert_eq!(parse_relative_time("Just now", now), Some(now));
        assert_eq!(
            parse_relative_time("Listed yesterday", now),
            Some(now - Duration::days(1))
        );
        assert_eq!(parse_relative_time("Brooklyn, NY", now), None);
    }
}
