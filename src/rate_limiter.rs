// Outbound request limiting: a token bucket smooths bursts and a sliding
// window caps absolute throughput. Neither returns errors, a full limiter is
// reported through `false` or by delaying the caller's task.

use std::{collections::VecDeque, time::Duration};

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ScraperConfig;

// Extra wait added after the oldest window entry ages out
const WINDOW_EPSILON: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a full bucket. `refill_rate` is in tokens per second.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        let capacity = capacity as f64;
        Self {
            capacity,
            refill_rate: refill_rate.max(0.0),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    pub fn can_consume(&self, tokens: u32) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens >= tokens as f64
    }

    pub fn consume(&self, tokens: u32) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);

        if state.tokens >= tokens as f64 {
            state.tokens -= tokens as f64;
            true
        } else {
            false
        }
    }

    /// Waits for roughly as long as the missing tokens take to refill, then
    /// deducts them without checking again.
    pub async fn consume_async(&self, tokens: u32) {
        let wait = {
            let mut state = self.state.lock();
            self.refill(&mut state);

            if state.tokens >= tokens as f64 {
                state.tokens -= tokens as f64;
                return;
            }

            if self.refill_rate <= 0.0 {
                None
            } else {
                // None when the wait is too long to represent
                Duration::try_from_secs_f64((tokens as f64 - state.tokens) / self.refill_rate).ok()
            }
        };

        match wait {
            Some(wait) => {
                debug!(wait_ms = wait.as_millis() as u64, "Token bucket empty, waiting");
                tokio::time::sleep(wait).await;
            }
            None => warn!(
                refill_rate = self.refill_rate,
                "Token bucket cannot refill in time, consuming without waiting"
            ),
        }

        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens = (state.tokens - tokens as f64).max(0.0);
    }

    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }
}

#[derive(Debug)]
pub struct SlidingWindow {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    fn prune(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn can_make_request(&self) -> bool {
        let mut timestamps = self.timestamps.lock();
        self.prune(&mut timestamps, Instant::now());
        timestamps.len() < self.max_requests
    }

    pub fn record_request(&self) -> bool {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        self.prune(&mut timestamps, now);

        if timestamps.len() < self.max_requests {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Waits until the oldest request leaves the window, then records
    /// without checking again.
    pub async fn record_request_async(&self) {
        let wait = {
            let now = Instant::now();
            let mut timestamps = self.timestamps.lock();
            self.prune(&mut timestamps, now);

            if timestamps.len() < self.max_requests {
                timestamps.push_back(now);
                return;
            }

            timestamps
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or_default()
                + WINDOW_EPSILON
        };

        debug!(wait_ms = wait.as_millis() as u64, "Sliding window full, waiting");
        tokio::time::sleep(wait).await;

        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        self.prune(&mut timestamps, now);
        timestamps.push_back(now);
    }

    pub fn current_count(&self) -> usize {
        let mut timestamps = self.timestamps.lock();
        self.prune(&mut timestamps, Instant::now());
        timestamps.len()
    }
}

/// Both limiters, admitted in sequence before every provider call.
#[derive(Debug)]
pub struct RateLimiter {
    pub bucket: TokenBucket,
    pub window: SlidingWindow,
}

impl RateLimiter {
    pub fn new(bucket: TokenBucket, window: SlidingWindow) -> Self {
        Self { bucket, window }
    }

    /// Bucket capacity is the concurrent request limit, refilled at the
    /// per-minute rate; the window allows the per-minute rate per minute.
    pub fn from_config(config: &ScraperConfig) -> Self {
        let per_minute = config.requests_per_minute.max(1);
        Self::new(
            TokenBucket::new(config.max_concurrent_requests.max(1), per_minute as f64 / 60.0),
            SlidingWindow::new(per_minute as usize, Duration::from_secs(60)),
        )
    }

    pub async fn acquire(&self) {
        self.bucket.consume_async(1).await;
        self.window.record_request_async().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;

    #[test]
    fn test_token_bucket_saturates_without_refill() {
        let bucket = TokenBucket::new(5, 0.0);

        for _ in 0..5 {
            assert!(bucket.consume(1));
        }
        assert!(!bucket.can_consume(1));
        assert!(!bucket.consume(1));
    }

    #[test]
    fn test_token_bucket_rejection_leaves_state_unchanged() {
        let bucket = TokenBucket::new(3, 0.0);
        assert!(bucket.consume(2));
        assert!(!bucket.consume(2));
        assert!(bucket.consume(1));
        assert_eq!(bucket.available_tokens(), 0.0);
    }

    #[test]
    fn test_token_bucket_refills_up_to_capacity() {
        let bucket = TokenBucket::new(2, 100.0);
        assert!(bucket.consume(2));
        assert!(!bucket.can_consume(1));

        std::thread::sleep(Duration::from_millis(50));
        assert!(bucket.can_consume(2));
        assert!(bucket.available_tokens() <= 2.0);
    }

    #[tokio::test]
    async fn test_token_bucket_async_waits_for_refill() {
        let bucket = TokenBucket::new(1, 20.0);
        bucket.consume_async(1).await;

        let start = StdInstant::now();
        bucket.consume_async(1).await;
        // one token at 20/s is 50ms away
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert!(bucket.available_tokens() < 1.0);
    }

    #[tokio::test]
    async fn test_token_bucket_async_without_refill_does_not_hang() {
        let bucket = TokenBucket::new(1, 0.0);
        bucket.consume_async(1).await;
        bucket.consume_async(1).await;
        assert_eq!(bucket.available_tokens(), 0.0);
    }

    #[tokio::test]
    async fn test_token_bucket_async_with_negligible_refill_does_not_hang() {
        let bucket = TokenBucket::new(1, 1e-300);
        bucket.consume_async(1).await;
        bucket.consume_async(1).await;
        assert!(bucket.available_tokens() < 1.0);
    }

    #[test]
    fn test_sliding_window_resets_after_window() {
        let window = SlidingWindow::new(1, Duration::from_millis(50));

        assert!(window.record_request());
        assert!(!window.record_request());
        assert!(!window.can_make_request());

        std::thread::sleep(Duration::from_millis(60));
        assert!(window.can_make_request());
        assert!(window.record_request());
        assert_eq!(window.current_count(), 1);
    }

    #[tokio::test]
    async fn test_sliding_window_async_waits_for_oldest() {
        let window = SlidingWindow::new(2, Duration::from_millis(80));
        window.record_request_async().await;
        window.record_request_async().await;

        let start = StdInstant::now();
        window.record_request_async().await;
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert!(window.current_count() <= 2);
    }

    #[tokio::test]
    async fn test_rate_limiter_acquire_counts_both() {
        let limiter = RateLimiter::new(
            TokenBucket::new(3, 1.0),
            SlidingWindow::new(10, Duration::from_secs(60)),
        );

        limiter.acquire().await;
        limiter.acquire().await;

        assert_eq!(limiter.window.current_count(), 2);
        assert!(limiter.bucket.available_tokens() < 1.5);
    }

    #[test]
    fn test_rate_limiter_from_config() {
        let config = ScraperConfig {
            requests_per_minute: 60,
            max_concurrent_requests: 4,
            ..Default::default()
        };
        let limiter = RateLimiter::from_config(&config);

        assert_eq!(limiter.bucket.available_tokens(), 4.0);
        assert_eq!(limiter.window.max_requests, 60);
    }
}
