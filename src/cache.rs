// Result cache for search results and listing details.
// Entries expire lazily: an expired entry is dropped the next time it is
// touched, or by the purge that runs on every `set` and `size`.

use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    time::Duration,
};

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub items_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub eviction_count: usize,
    pub expired_count: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    // position in insertion order
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_alive(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug)]
struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    // insertion sequence -> key, oldest first
    order: BTreeMap<u64, String>,
    next_seq: u64,
    stats: CacheStats,
}

impl<V> CacheInner<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_alive(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            self.remove(&key);
            self.stats.expired_count += 1;
        }
    }

    fn evict_oldest(&mut self) {
        if let Some((_, key)) = self.order.pop_first() {
            self.entries.remove(&key);
            self.stats.eviction_count += 1;
            debug!(key = %key, "Evicted oldest cache entry");
        }
    }

    // Drops the entry if it has expired; true when a live entry remains
    fn check_alive(&mut self, key: &str, now: Instant) -> bool {
        let alive = match self.entries.get(key) {
            Some(entry) => entry.is_alive(now),
            None => return false,
        };

        if !alive {
            self.remove(key);
            self.stats.expired_count += 1;
        }
        alive
    }
}

/// Time-boxed key/value store with a capacity bound.
///
/// At capacity, the oldest-inserted entry is evicted (insertion order, not
/// access order). `get_or_set` does not collapse concurrent misses for the
/// same key: each caller runs its own factory.
#[derive(Debug)]
pub struct ResultCache<V> {
    max_size: usize,
    default_ttl: Duration,
    inner: Mutex<CacheInner<V>>,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            default_ttl,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.purge_expired(now);

        // an overwrite takes the newest position and never evicts a neighbour
        let replaced = inner.remove(key).is_some();
        if !replaced && inner.entries.len() >= self.max_size {
            inner.evict_oldest();
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.to_string());
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl.unwrap_or(self.default_ttl),
                seq,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if inner.check_alive(key, now) {
            inner.stats.hit_count += 1;
            inner.entries.get(key).map(|entry| entry.value.clone())
        } else {
            inner.stats.miss_count += 1;
            None
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner.lock().check_alive(key, Instant::now())
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn size(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.purge_expired(Instant::now());
        inner.entries.len()
    }

    /// Returns the cached value, or runs `factory` and caches what it yields.
    /// Factory errors are handed back and nothing is cached.
    pub async fn get_or_set<F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        ttl: Option<Duration>,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = factory().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            items_count: inner.entries.len(),
            ..inner.stats.clone()
        }
    }
}
