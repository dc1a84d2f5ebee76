// Marketplace listing acquisition and relevance-scoring pipeline

// Export modules for each stage of the pipeline
pub mod cache;
pub mod config;
pub mod listing;
pub mod marketplace;
pub mod parser;
pub mod provider;
pub mod rate_limiter;
pub mod retry;
pub mod scorer;
pub mod synthetic;

// Re-export key types for convenience
pub use cache::{CacheStats, ResultCache};
pub use config::ScraperConfig;
pub use listing::{Currency, Listing, SearchCriteria, SellerSummary};
pub use marketplace::{MarketplaceSearch, SearchStats};
pub use parser::{extract_item_id, extract_price_and_currency, ListingParser, MarketplaceHtmlParser};
pub use provider::{BrightDataClient, ProviderRequest, ScrapeError, ScrapingProvider};
pub use rate_limiter::{RateLimiter, SlidingWindow, TokenBucket};
pub use retry::{calculate_backoff, fetch_with_retry, RetryConfig};
pub use scorer::{RelevanceScorer, ScoreBreakdown, ScoredListing};
pub use synthetic::SyntheticListings;
