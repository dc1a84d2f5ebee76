// Scraping provider: the HTTP seam between the pipeline and the unblocking
// proxy that fetches Marketplace pages on our behalf.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::config::ScraperConfig;
use crate::listing::{SearchCriteria, MARKETPLACE_BASE_URL};

// Longest slice of an error body carried into an error message
const ERROR_BODY_PREVIEW: usize = 200;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScrapeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Provider error: {status_code} - {message}")]
    ProviderResponse { status_code: u16, message: String },

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),
}

impl ScrapeError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ScrapeError::Configuration(_))
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ScrapeError::RateLimited(_))
    }
}

/// Body of a provider fetch request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderRequest {
    pub zone: String,
    pub url: String,
    pub format: String,
    pub country: String,
    pub session: String,
    // milliseconds
    pub timeout: u64,
}

impl ProviderRequest {
    pub fn new(config: &ScraperConfig, target_url: impl Into<String>) -> Self {
        Self {
            zone: config.zone.clone(),
            url: target_url.into(),
            format: "raw".to_string(),
            country: config.country.clone(),
            session: format!("findr-{:016x}", rand::random::<u64>()),
            timeout: config.request_timeout.as_millis() as u64,
        }
    }
}

// JSON wrapper some zones return instead of the raw page
#[derive(Debug, Clone, Deserialize)]
struct ProviderEnvelope {
    status_code: u16,
    #[serde(default)]
    body: String,
}

/// Builds the Marketplace search page URL for `criteria`.
///
/// The location becomes a lowercase slug path segment; without one the
/// generic `search` segment is used.
pub fn build_search_url(criteria: &SearchCriteria) -> Result<Url, ScrapeError> {
    let mut url = Url::parse(MARKETPLACE_BASE_URL)
        .map_err(|e| ScrapeError::Configuration(format!("invalid marketplace url: {}", e)))?;

    let slug = criteria
        .location
        .as_deref()
        .map(location_slug)
        .filter(|slug| !slug.is_empty())
        .unwrap_or_else(|| "search".to_string());

    url.path_segments_mut()
        .map_err(|_| ScrapeError::Configuration("marketplace url cannot be a base".to_string()))?
        .push(&slug)
        .push("search");

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("query", criteria.query.trim());
        if let Some(min) = criteria.min_price {
            query.append_pair("minPrice", &min.to_string());
        }
        if let Some(max) = criteria.max_price {
            query.append_pair("maxPrice", &max.to_string());
        }
        if let Some(radius) = criteria.radius_miles {
            query.append_pair("radius", &radius.to_string());
        }
        if let Some(category) = criteria.category.as_deref() {
            query.append_pair("category", category);
        }
    }

    Ok(url)
}

fn location_slug(location: &str) -> String {
    location
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn mentions_rate_limit(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("rate limit") || lower.contains("too many requests")
}

fn preview(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(ERROR_BODY_PREVIEW) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Maps an HTTP status and body from the provider to page HTML or an error.
pub fn interpret_response(status_code: u16, body: &str) -> Result<String, ScrapeError> {
    if status_code == 429 {
        return Err(ScrapeError::RateLimited(preview(body)));
    }

    if !(200..300).contains(&status_code) {
        if mentions_rate_limit(body) {
            return Err(ScrapeError::RateLimited(preview(body)));
        }
        return Err(ScrapeError::ProviderResponse {
            status_code,
            message: preview(body),
        });
    }

    let trimmed = body.trim_start();
    if trimmed.starts_with('{') {
        let envelope: ProviderEnvelope = serde_json::from_str(trimmed)
            .map_err(|e| ScrapeError::MalformedResponse(e.to_string()))?;
        // the envelope carries the status of the target page fetch
        return interpret_response(envelope.status_code, &envelope.body);
    }

    if trimmed.is_empty() {
        return Err(ScrapeError::MalformedResponse("empty response body".to_string()));
    }

    Ok(body.to_string())
}

#[async_trait]
pub trait ScrapingProvider: Send + Sync {
    /// Fetches the page named by `request.url` and returns its HTML.
    async fn fetch(&self, request: &ProviderRequest) -> Result<String, ScrapeError>;
}

/// Bright Data Web Unlocker client.
#[derive(Debug, Clone)]
pub struct BrightDataClient {
    client: Client,
    api_key: String,
    base_url: String,
    timeout_ms: u64,
}

impl BrightDataClient {
    pub fn new(config: &ScraperConfig) -> Result<Self, ScrapeError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ScrapeError::Configuration("BRIGHTDATA_API_KEY is not set".to_string()))?
            .to_string();

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ScrapeError::Configuration(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.clone(),
            timeout_ms: config.request_timeout.as_millis() as u64,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> ScrapeError {
        if err.is_timeout() {
            ScrapeError::Timeout(self.timeout_ms)
        } else {
            ScrapeError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl ScrapingProvider for BrightDataClient {
    async fn fetch(&self, request: &ProviderRequest) -> Result<String, ScrapeError> {
        info!(url = %request.url, zone = %request.zone, "Fetching page through provider");

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status_code = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        debug!(status_code, bytes = body.len(), "Provider responded");

        interpret_response(status_code, &body)
    }
}

// Mock provider for testing
pub mod mock_provider {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Default)]
    pub struct MockProvider {
        default_response: Mutex<String>,
        // full target url -> html
        responses: Mutex<HashMap<String, String>>,
        request_count: AtomicUsize,
        fail_next_requests: AtomicUsize,
        rate_limit_next_requests: AtomicUsize,
        delay_ms: AtomicU64,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl MockProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_response(html: impl Into<String>) -> Self {
            let provider = Self::new();
            provider.set_default_response(html);
            provider
        }

        pub fn set_default_response(&self, html: impl Into<String>) {
            *self.default_response.lock() = html.into();
        }

        pub fn add_response(&self, url: impl Into<String>, html: impl Into<String>) {
            self.responses.lock().insert(url.into(), html.into());
        }

        pub fn fail_next_requests(&self, count: usize) {
            self.fail_next_requests.store(count, Ordering::SeqCst);
        }

        pub fn rate_limit_next_requests(&self, count: usize) {
            self.rate_limit_next_requests.store(count, Ordering::SeqCst);
        }

        pub fn set_delay(&self, delay_ms: u64) {
            self.delay_ms.store(delay_ms, Ordering::SeqCst);
        }

        pub fn request_count(&self) -> usize {
            self.request_count.load(Ordering::SeqCst)
        }

        pub fn requests(&self) -> Vec<ProviderRequest> {
            self.requests.lock().clone()
        }

        // Decrements `counter` if it is positive; true when it was
        fn take_one(counter: &AtomicUsize) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl ScrapingProvider for MockProvider {
        async fn fetch(&self, request: &ProviderRequest) -> Result<String, ScrapeError> {
            self.request_count.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().push(request.clone());

            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            if Self::take_one(&self.rate_limit_next_requests) {
                return Err(ScrapeError::RateLimited("Too many requests".to_string()));
            }

            if Self::take_one(&self.fail_next_requests) {
                return Err(ScrapeError::ProviderResponse {
                    status_code: 500,
                    message: "Internal Server Error".to_string(),
                });
            }

            let body = match self.responses.lock().get(&request.url) {
                Some(html) => html.clone(),
                None => self.default_response.lock().clone(),
            };
            interpret_response(200, &body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock_provider::MockProvider;
    use super::*;
    use std::time::Duration;

    fn config_with_key(key: Option<&str>) -> ScraperConfig {
        ScraperConfig {
            api_key: key.map(str::to_string),
            request_timeout: Duration::from_secs(12),
            ..Default::default()
        }
    }

    #[test]
    fn test_error_classification() {
        assert!(!ScrapeError::Configuration("no key".into()).is_retryable());
        assert!(ScrapeError::Network("reset".into()).is_retryable());
        assert!(ScrapeError::Timeout(30000).is_retryable());
        assert!(ScrapeError::MalformedResponse("bad json".into()).is_retryable());

        let limited = ScrapeError::RateLimited("slow down".into());
        assert!(limited.is_retryable());
        assert!(limited.is_rate_limit());
        assert!(!ScrapeError::Timeout(1).is_rate_limit());
    }

    #[test]
    fn test_search_url_with_location_and_filters() {
        let criteria = SearchCriteria::new("vintage chair")
            .with_location("San Francisco, CA")
            .with_radius(10.0)
            .with_price_range(Some(50.0), Some(200.0))
            .with_category("furniture");

        let url = build_search_url(&criteria).unwrap();

        assert_eq!(url.path(), "/marketplace/san-francisco-ca/search");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("query".to_string(), "vintage chair".to_string()),
                ("minPrice".to_string(), "50".to_string()),
                ("maxPrice".to_string(), "200".to_string()),
                ("radius".to_string(), "10".to_string()),
                ("category".to_string(), "furniture".to_string()),
            ]
        );
    }

    #[test]
    fn test_search_url_without_location() {
        let url = build_search_url(&SearchCriteria::new("bike")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.facebook.com/marketplace/search/search?query=bike"
        );

        let blank = build_search_url(&SearchCriteria::new("bike").with_location(" , ")).unwrap();
        assert_eq!(blank.path(), "/marketplace/search/search");
    }

    #[test]
    fn test_provider_request_body() {
        let config = config_with_key(Some("secret"));
        let request = ProviderRequest::new(&config, "https://www.facebook.com/marketplace/item/1/");

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["zone"], "web_unlocker1");
        assert_eq!(json["format"], "raw");
        assert_eq!(json["country"], "us");
        assert_eq!(json["timeout"], 12000);
        assert!(json["session"].as_str().unwrap().starts_with("findr-"));

        let other = ProviderRequest::new(&config, "https://www.facebook.com/marketplace/item/1/");
        assert_ne!(request.session, other.session);
    }

    #[test]
    fn test_interpret_raw_html() {
        let html = "<html><body>ok</body></html>";
        assert_eq!(interpret_response(200, html).unwrap(), html);
        assert!(matches!(
            interpret_response(200, "   "),
            Err(ScrapeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_interpret_envelope() {
        let ok = r#"{"status_code":200,"body":"<div>page</div>"}"#;
        assert_eq!(interpret_response(200, ok).unwrap(), "<div>page</div>");

        let limited = r#"{"status_code":429,"body":""}"#;
        assert!(interpret_response(200, limited).unwrap_err().is_rate_limit());

        let failed = r#"{"status_code":502,"body":"upstream down"}"#;
        assert_eq!(
            interpret_response(200, failed).unwrap_err(),
            ScrapeError::ProviderResponse {
                status_code: 502,
                message: "upstream down".to_string()
            }
        );

        assert!(matches!(
            interpret_response(200, "{not json"),
            Err(ScrapeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_interpret_error_statuses() {
        assert!(interpret_response(429, "").unwrap_err().is_rate_limit());
        assert!(interpret_response(403, "Rate limit exceeded for zone")
            .unwrap_err()
            .is_rate_limit());

        match interpret_response(401, "invalid token") {
            Err(ScrapeError::ProviderResponse { status_code, message }) => {
                assert_eq!(status_code, 401);
                assert_eq!(message, "invalid token");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_error_preview_is_truncated() {
        let long = "x".repeat(500);
        match interpret_response(500, &long) {
            Err(ScrapeError::ProviderResponse { message, .. }) => {
                assert_eq!(message.len(), ERROR_BODY_PREVIEW + 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_client_requires_api_key() {
        assert!(matches!(
            BrightDataClient::new(&config_with_key(None)),
            Err(ScrapeError::Configuration(_))
        ));
        assert!(matches!(
            BrightDataClient::new(&config_with_key(Some("  "))),
            Err(ScrapeError::Configuration(_))
        ));
        assert!(BrightDataClient::new(&config_with_key(Some("secret"))).is_ok());
    }

    #[tokio::test]
    async fn test_mock_provider_scripted_failures() {
        let provider = MockProvider::with_response("<html>default</html>");
        provider.add_response("https://example.test/a", "<html>a</html>");
        provider.rate_limit_next_requests(1);
        provider.fail_next_requests(1);

        let config = ScraperConfig::default();
        let request = ProviderRequest::new(&config, "https://example.test/a");

        assert!(provider.fetch(&request).await.unwrap_err().is_rate_limit());
        assert!(matches!(
            provider.fetch(&request).await,
            Err(ScrapeError::ProviderResponse { status_code: 500, .. })
        ));
        assert_eq!(provider.fetch(&request).await.unwrap(), "<html>a</html>");

        let other = ProviderRequest::new(&config, "https://example.test/b");
        assert_eq!(provider.fetch(&other).await.unwrap(), "<html>default</html>");

        assert_eq!(provider.request_count(), 4);
        assert_eq!(provider.requests()[3].url, "https://example.test/b");
    }
}
