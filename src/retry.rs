// Bounded retry with exponential backoff and jitter around a single provider call

use std::{future::Future, time::Duration};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::provider::ScrapeError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    // retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    // uniform jitter added on top, 0..=jitter_ms
    pub jitter_ms: u64,
    // overall budget across attempts and waits
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
            backoff_multiplier: 2.0,
            jitter_ms: 200,
            max_elapsed: None,
        }
    }
}

// Helper to calculate exponential backoff with jitter
pub fn calculate_backoff(retry_attempt: u32, config: &RetryConfig) -> Duration {
    let base_backoff_ms = (config.initial_backoff_ms as f64
        * config.backoff_multiplier.powf(retry_attempt as f64))
    .min(config.max_backoff_ms as f64);

    let jitter_ms = if config.jitter_ms > 0 {
        rand::random::<u64>() % (config.jitter_ms + 1)
    } else {
        0
    };

    Duration::from_millis(base_backoff_ms as u64 + jitter_ms)
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the retry budget runs out. The last error is returned on exhaustion.
pub async fn fetch_with_retry<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, ScrapeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScrapeError>>,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt, "Provider call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        if attempt >= config.max_retries {
            warn!(attempts = attempt + 1, error = %err, "Retries exhausted");
            return Err(err);
        }

        let backoff = calculate_backoff(attempt, config);
        if let Some(budget) = config.max_elapsed {
            if started.elapsed() + backoff > budget {
                warn!(attempts = attempt + 1, error = %err, "Retry budget exceeded");
                return Err(err);
            }
        }

        warn!(
            attempt = attempt + 1,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "Provider call failed, retrying"
        );
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}
