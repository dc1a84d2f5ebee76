// Pipeline configuration, read from the environment with safe defaults so the
// pipeline runs without live credentials (it then serves synthetic listings)

use std::{env, str::FromStr, time::Duration};

use crate::retry::RetryConfig;

pub const DEFAULT_PROVIDER_URL: &str = "https://api.brightdata.com/request";
pub const DEFAULT_ZONE: &str = "web_unlocker1";

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub zone: String,
    pub country: String,
    pub cache_ttl: Duration,
    // synthetic results expire sooner than real ones
    pub fallback_ttl: Duration,
    pub cache_max_size: usize,
    pub requests_per_minute: u32,
    pub max_concurrent_requests: u32,
    pub request_timeout: Duration,
    pub rate_limit_cooldown: Duration,
    pub max_rate_limit_retries: u32,
    pub retry: RetryConfig,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_PROVIDER_URL.to_string(),
            zone: DEFAULT_ZONE.to_string(),
            country: "us".to_string(),
            cache_ttl: Duration::from_secs(300),
            fallback_ttl: Duration::from_secs(60),
            cache_max_size: 100,
            requests_per_minute: 30,
            max_concurrent_requests: 5,
            request_timeout: Duration::from_secs(30),
            rate_limit_cooldown: Duration::from_secs(5),
            max_rate_limit_retries: 1,
            retry: RetryConfig::default(),
        }
    }
}

impl ScraperConfig {
    /// Loads configuration from process environment variables.
    ///
    /// # Environment Variables
    /// - `BRIGHTDATA_API_KEY` - provider API key (default: none, synthetic data only)
    /// - `BRIGHTDATA_BASE_URL` - provider endpoint
    /// - `BRIGHTDATA_ZONE` - provider zone identifier
    /// - `SCRAPER_COUNTRY` - proxy country (default: us)
    /// - `SCRAPER_CACHE_TTL_SECS` / `SCRAPER_FALLBACK_TTL_SECS` (default: 300 / 60)
    /// - `SCRAPER_CACHE_MAX_SIZE` (default: 100)
    /// - `SCRAPER_REQUESTS_PER_MINUTE` (default: 30)
    /// - `SCRAPER_MAX_CONCURRENT_REQUESTS` (default: 5)
    /// - `SCRAPER_REQUEST_TIMEOUT_SECS` (default: 30)
    /// - `SCRAPER_MAX_RETRIES` (default: 3)
    /// - `SCRAPER_RATE_LIMIT_COOLDOWN_SECS` (default: 5)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`ScraperConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let text = |name: &str, default: String| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };
        let secs = |name: &str, default: Duration| {
            Duration::from_secs(parse_or(lookup(name), default.as_secs()))
        };

        let api_key = lookup("BRIGHTDATA_API_KEY")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let mut retry = defaults.retry.clone();
        retry.max_retries = parse_or(lookup("SCRAPER_MAX_RETRIES"), retry.max_retries);

        Self {
            api_key,
            base_url: text("BRIGHTDATA_BASE_URL", defaults.base_url),
            zone: text("BRIGHTDATA_ZONE", defaults.zone),
            country: text("SCRAPER_COUNTRY", defaults.country),
            cache_ttl: secs("SCRAPER_CACHE_TTL_SECS", defaults.cache_ttl),
            fallback_ttl: secs("SCRAPER_FALLBACK_TTL_SECS", defaults.fallback_ttl),
            cache_max_size: parse_or(lookup("SCRAPER_CACHE_MAX_SIZE"), defaults.cache_max_size),
            requests_per_minute: parse_or(
                lookup("SCRAPER_REQUESTS_PER_MINUTE"),
                defaults.requests_per_minute,
            ),
            max_concurrent_requests: parse_or(
                lookup("SCRAPER_MAX_CONCURRENT_REQUESTS"),
                defaults.max_concurrent_requests,
            ),
            request_timeout: secs("SCRAPER_REQUEST_TIMEOUT_SECS", defaults.request_timeout),
            rate_limit_cooldown: secs(
                "SCRAPER_RATE_LIMIT_COOLDOWN_SECS",
                defaults.rate_limit_cooldown,
            ),
            max_rate_limit_retries: defaults.max_rate_limit_retries,
            retry,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
