// Marketplace search orchestrator.
//
// cache -> rate limiter -> provider (with retry) -> parser -> synthetic
// fallback -> cache. A provider rate-limit signal that survives the retry loop
// triggers a bounded cooldown, after which the whole sequence runs again.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheStats, ResultCache};
use crate::config::ScraperConfig;
use crate::listing::{Listing, SearchCriteria};
use crate::parser::{ListingParser, MarketplaceHtmlParser};
use crate::provider::{
    build_search_url, BrightDataClient, ProviderRequest, ScrapeError, ScrapingProvider,
};
use crate::rate_limiter::RateLimiter;
use crate::retry::fetch_with_retry;
use crate::scorer::{RelevanceScorer, ScoredListing};
use crate::synthetic::SyntheticListings;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub searches: u64,
    pub cache_hits: u64,
    pub provider_calls: u64,
    pub provider_failures: u64,
    pub fallbacks: u64,
    pub rate_limit_cooldowns: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    searches: AtomicU64,
    cache_hits: AtomicU64,
    provider_calls: AtomicU64,
    provider_failures: AtomicU64,
    fallbacks: AtomicU64,
    rate_limit_cooldowns: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SearchStats {
        SearchStats {
            searches: self.searches.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            rate_limit_cooldowns: self.rate_limit_cooldowns.load(Ordering::Relaxed),
        }
    }
}

pub struct MarketplaceSearch {
    config: ScraperConfig,
    provider: Option<Arc<dyn ScrapingProvider>>,
    parser: Arc<dyn ListingParser>,
    scorer: RelevanceScorer,
    synthetic: SyntheticListings,
    search_cache: Arc<ResultCache<Vec<Listing>>>,
    detail_cache: Arc<ResultCache<Listing>>,
    limiter: Arc<RateLimiter>,
    counters: StatsCounters,
}

impl MarketplaceSearch {
    /// Builds the orchestrator around the Bright Data client. Without an API
    /// key there is no provider and every search is served synthetic data.
    pub fn new(config: ScraperConfig) -> Result<Self, ScrapeError> {
        let provider: Option<Arc<dyn ScrapingProvider>> = if config.has_credentials() {
            Some(Arc::new(BrightDataClient::new(&config)?))
        } else {
            warn!("BRIGHTDATA_API_KEY not set, searches will return synthetic listings");
            None
        };

        Ok(Self::build(config, provider))
    }

    pub fn with_provider(config: ScraperConfig, provider: Arc<dyn ScrapingProvider>) -> Self {
        Self::build(config, Some(provider))
    }

    fn build(config: ScraperConfig, provider: Option<Arc<dyn ScrapingProvider>>) -> Self {
        Self {
            search_cache: Arc::new(ResultCache::new(config.cache_max_size, config.cache_ttl)),
            detail_cache: Arc::new(ResultCache::new(config.cache_max_size, config.cache_ttl)),
            limiter: Arc::new(RateLimiter::from_config(&config)),
            parser: Arc::new(MarketplaceHtmlParser::new()),
            scorer: RelevanceScorer::new(),
            synthetic: SyntheticListings::new(),
            counters: StatsCounters::default(),
            provider,
            config,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn ListingParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Shares a limiter with other orchestrators talking to the same provider.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_synthetic(mut self, synthetic: SyntheticListings) -> Self {
        self.synthetic = synthetic;
        self
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    /// Returns listings for `criteria`, real when the provider page parses,
    /// synthetic otherwise. Errors only when the provider call fails after
    /// retries and the rate-limit cooldowns are spent.
    pub async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<Listing>, ScrapeError> {
        StatsCounters::bump(&self.counters.searches);

        let result = self.with_cooldown(|| self.search_once(criteria)).await;
        if let Err(err) = &result {
            error!(query = %criteria.query, error = %err, "Marketplace search failed");
        }
        result
    }

    /// `search`, then ranked by relevance to `criteria`, best first.
    pub async fn search_ranked(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<Vec<ScoredListing>, ScrapeError> {
        let listings = self.search(criteria).await?;
        Ok(self.scorer.rank(listings, criteria))
    }

    /// Fetches and parses one listing page. `Ok(None)` when the page has
    /// nothing recognisable.
    pub async fn listing_details(&self, listing_id: &str) -> Result<Option<Listing>, ScrapeError> {
        let listing_id = listing_id.trim();
        if listing_id.is_empty() {
            return Ok(None);
        }

        self.with_cooldown(|| self.details_once(listing_id)).await
    }

    pub fn stats(&self) -> SearchStats {
        self.counters.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.search_cache.stats()
    }

    async fn with_cooldown<T, F, Fut>(&self, mut operation: F) -> Result<T, ScrapeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScrapeError>>,
    {
        let mut cooldowns = 0;
        loop {
            match operation().await {
                Err(err) if err.is_rate_limit() && cooldowns < self.config.max_rate_limit_retries => {
                    cooldowns += 1;
                    StatsCounters::bump(&self.counters.rate_limit_cooldowns);
                    warn!(
                        cooldown_ms = self.config.rate_limit_cooldown.as_millis() as u64,
                        cooldown = cooldowns,
                        "Provider rate limited, cooling down"
                    );
                    tokio::time::sleep(self.config.rate_limit_cooldown).await;
                }
                other => return other,
            }
        }
    }

    async fn search_once(&self, criteria: &SearchCriteria) -> Result<Vec<Listing>, ScrapeError> {
        let key = criteria.cache_key();
        if let Some(listings) = self.search_cache.get(&key) {
            StatsCounters::bump(&self.counters.cache_hits);
            debug!(key = %key, count = listings.len(), "Search cache hit");
            return Ok(listings);
        }

        let Some(provider) = self.provider.as_ref() else {
            return Ok(self.fallback(criteria, &key, "no provider configured"));
        };

        let url = build_search_url(criteria)?;
        let html = self.fetch_page(provider, url.as_str()).await?;

        let mut listings = self.parser.parse_search_results(&html);
        if listings.is_empty() {
            return Ok(self.fallback(criteria, &key, "no listings parsed"));
        }

        listings.truncate(criteria.limit);
        info!(query = %criteria.query, count = listings.len(), "Search returned listings");
        self.search_cache.set(&key, listings.clone(), None);
        Ok(listings)
    }

    async fn details_once(&self, listing_id: &str) -> Result<Option<Listing>, ScrapeError> {
        let key = format!("listing:{}", listing_id);
        if let Some(listing) = self.detail_cache.get(&key) {
            StatsCounters::bump(&self.counters.cache_hits);
            debug!(key = %key, "Listing cache hit");
            return Ok(Some(listing));
        }

        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| ScrapeError::Configuration("no scraping provider configured".to_string()))?;

        let html = self
            .fetch_page(provider, &Listing::canonical_url(listing_id))
            .await?;

        let listing = self.parser.parse_listing_detail(&html, listing_id);
        match &listing {
            Some(listing) => self.detail_cache.set(&key, listing.clone(), None),
            None => debug!(listing_id, "Listing page had no parseable content"),
        }
        Ok(listing)
    }

    async fn fetch_page(
        &self,
        provider: &Arc<dyn ScrapingProvider>,
        url: &str,
    ) -> Result<String, ScrapeError> {
        self.limiter.acquire().await;

        let request = &ProviderRequest::new(&self.config, url);
        let counters = &self.counters;
        let result = fetch_with_retry(&self.config.retry, || async move {
            StatsCounters::bump(&counters.provider_calls);
            provider.fetch(request).await
        })
        .await;

        if result.is_err() {
            StatsCounters::bump(&self.counters.provider_failures);
        }
        result
    }

    fn fallback(&self, criteria: &SearchCriteria, key: &str, reason: &str) -> Vec<Listing> {
        StatsCounters::bump(&self.counters.fallbacks);
        let listings = self.synthetic.generate(criteria, Utc::now());
        warn!(
            query = %criteria.query,
            count = listings.len(),
            reason,
            "Serving synthetic listings"
        );
        self.search_cache
            .set(key, listings.clone(), Some(self.config.fallback_ttl));
        listings
    }
}
