//! Bounded in-process result cache with per-entry TTL and LRU eviction.
//!
//! One mutex guards the LRU map and the hit/miss counters. Lookups and
//! writes never hold it across an `.await`; the query run on a miss by
//! [`ResultCache::with_cache`] executes with the lock released.
//!
//! Values of any `Serialize + DeserializeOwned` type share one cache: each
//! entry is stored as a type-tagged envelope (see [`crate::serialization`]).
//! A payload that does not decode as the requested type is evicted and
//! counted as a miss.
//!
//! Expiry uses `tokio::time::Instant`, so tests running on a paused clock can
//! move entries past their TTL with `tokio::time::advance`.

use crate::config::CacheConfig;
use crate::error::Result;
use crate::observability::{CacheMetrics, EvictionReason, NoOpMetrics};
use crate::serialization::{decode_cached, encode_for_cache, CodecError};
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Cached payload with its absolute expiry.
struct CacheEntry {
    bytes: Vec<u8>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(bytes: Vec<u8>, ttl: Duration) -> Self {
        CacheEntry {
            bytes,
            expires_at: Instant::now() + ttl,
        }
    }

    /// An entry is live strictly before `expires_at`.
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

enum Lookup<R> {
    Hit(R),
    Miss,
    Expired,
    Undecodable(CodecError),
}

/// Snapshot of cache counters.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    /// `hits / (hits + misses)`, or 0 before any lookup.
    pub hit_rate: f64,
}

/// Thread-safe result cache.
///
/// Cloning is cheap and every clone shares the same store.
///
/// # Example
///
/// ```
/// use datalayer_kit::cache::ResultCache;
/// use datalayer_kit::config::{CacheConfig, TtlClass};
///
/// let cache = ResultCache::new(CacheConfig::default());
/// cache.set("course:1", &"Intro to Rust".to_string(), TtlClass::Static);
///
/// let title: Option<String> = cache.get("course:1");
/// assert_eq!(title.as_deref(), Some("Intro to Rust"));
/// assert_eq!(cache.stats().hits, 1);
/// ```
#[derive(Clone)]
pub struct ResultCache {
    state: Arc<Mutex<CacheState>>,
    config: Arc<CacheConfig>,
    metrics: Arc<dyn CacheMetrics>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ResultCache {
    /// Create an empty cache bounded by `config.max_entries` (minimum 1).
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        ResultCache {
            state: Arc::new(Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            })),
            config: Arc::new(config),
            metrics: Arc::new(NoOpMetrics),
            sweeper: Arc::new(Mutex::new(None)),
        }
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up `key` and decode it as `T`.
    ///
    /// A hit promotes the entry to most-recently-used. Expired and
    /// undecodable entries are removed and reported as a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key, decode_cached::<T>)
    }

    /// Look up the raw enveloped bytes stored under `key`.
    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.lookup(key, |bytes| Ok(bytes.to_vec()))
    }

    /// Decode happens under the lock, so an undecodable entry is evicted
    /// before any concurrent `set` can replace it.
    fn lookup<R>(
        &self,
        key: &str,
        decode: impl FnOnce(&[u8]) -> std::result::Result<R, CodecError>,
    ) -> Option<R> {
        let timer = Instant::now();

        let outcome = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let outcome = match state.entries.get(key) {
                None => Lookup::Miss,
                Some(entry) if entry.is_expired(now) => Lookup::Expired,
                Some(entry) => match decode(&entry.bytes) {
                    Ok(value) => Lookup::Hit(value),
                    Err(e) => Lookup::Undecodable(e),
                },
            };

            match outcome {
                Lookup::Hit(_) => state.hits += 1,
                Lookup::Miss => state.misses += 1,
                Lookup::Expired | Lookup::Undecodable(_) => {
                    state.entries.pop(key);
                    state.misses += 1;
                }
            }
            outcome
        };

        match outcome {
            Lookup::Hit(value) => {
                self.metrics.record_hit(key, timer.elapsed());
                Some(value)
            }
            Lookup::Miss => {
                self.metrics.record_miss(key, timer.elapsed());
                None
            }
            Lookup::Expired => {
                self.metrics.record_eviction(key, EvictionReason::Expired);
                self.metrics.record_miss(key, timer.elapsed());
                None
            }
            Lookup::Undecodable(e) => {
                warn!("Cache entry {} is undecodable, evicted: {}", key, e);
                self.metrics
                    .record_eviction(key, EvictionReason::Undecodable);
                self.metrics.record_miss(key, timer.elapsed());
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// When the cache is full and `key` is new, the least-recently-used
    /// entry is evicted first. Overwrites keep the size unchanged and refresh
    /// both recency and expiry; concurrent writers race with last-write-wins.
    /// Encoding failures are logged and the value is simply not cached.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: impl Into<Duration>) {
        let ttl = ttl.into();
        let bytes = match encode_for_cache(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Not caching {}: {}", key, e);
                return;
            }
        };

        let evicted = {
            let mut state = self.state.lock();
            let evicted = if !state.entries.contains(key)
                && state.entries.len() >= state.entries.cap().get()
            {
                state.entries.pop_lru().map(|(evicted_key, _)| evicted_key)
            } else {
                None
            };
            state
                .entries
                .put(key.to_string(), CacheEntry::new(bytes, ttl));
            evicted
        };

        if let Some(evicted_key) = evicted {
            self.metrics
                .record_eviction(&evicted_key, EvictionReason::Capacity);
        }
        self.metrics.record_set(key, ttl);
    }

    /// Store `value` using the configured default TTL.
    pub fn set_default<T: Serialize>(&self, key: &str, value: &T) {
        self.set(key, value, self.config.default_ttl);
    }

    /// Remove one entry. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.state.lock().entries.pop(key).is_some();
        self.metrics.record_delete(key, usize::from(removed));
        removed
    }

    /// Remove every entry whose key matches `pattern`.
    ///
    /// Returns the number of entries removed.
    pub fn delete_pattern(&self, pattern: &Regex) -> usize {
        let removed = {
            let mut state = self.state.lock();
            let matching: Vec<String> = state
                .entries
                .iter()
                .filter(|(key, _)| pattern.is_match(key))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &matching {
                state.entries.pop(key);
            }
            matching.len()
        };

        self.metrics.record_delete(pattern.as_str(), removed);
        removed
    }

    /// Compile `pattern` and remove every matching entry.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::Validation` if `pattern` is not a valid regex.
    pub fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let regex = Regex::new(pattern)?;
        Ok(self.delete_pattern(&regex))
    }

    /// Empty the store and reset hit/miss counters.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.hits = 0;
        state.misses = 0;
        info!("Result cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            size: state.entries.len(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live entry exists. Does not touch recency or counters.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Keys currently stored that match `pattern`, most recent first.
    pub fn keys_matching(&self, pattern: &Regex) -> Vec<String> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|(key, _)| pattern.is_match(key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = {
            let mut state = self.state.lock();
            let expired: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                state.entries.pop(key);
            }
            expired
        };

        for key in &expired {
            self.metrics.record_eviction(key, EvictionReason::Expired);
        }
        if !expired.is_empty() {
            debug!("Purged {} expired cache entries", expired.len());
        }
        expired.len()
    }

    /// Start a background task that purges expired entries every `every`.
    ///
    /// Replaces any sweeper already running. Must be called from within a
    /// tokio runtime; the task stops on [`ResultCache::shutdown`].
    pub fn spawn_sweeper(&self, every: Duration) {
        let cache = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                cache.purge_expired();
            }
        });

        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
        info!("Cache sweeper started (every {:?})", every);
    }

    /// Stop the sweeper (if any) and clear the cache.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.clear();
    }

    /// Return the cached value for `key`, or run `query` and cache its result.
    ///
    /// Only `Ok` results are stored; an `Err` is returned unchanged and
    /// leaves the cache untouched.
    ///
    /// # Example
    ///
    /// ```
    /// use datalayer_kit::cache::ResultCache;
    /// use datalayer_kit::config::{CacheConfig, TtlClass};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> datalayer_kit::Result<()> {
    /// let cache = ResultCache::new(CacheConfig::default());
    /// let ids: Vec<u64> = cache
    ///     .with_cache("course:7:modules", TtlClass::Frequent, || async { Ok(vec![1, 2, 3]) })
    ///     .await?;
    /// assert_eq!(ids, vec![1, 2, 3]);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns whatever error `query` returns.
    pub async fn with_cache<T, F, Fut>(
        &self,
        key: &str,
        ttl: impl Into<Duration>,
        query: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get::<T>(key) {
            return Ok(value);
        }

        let value = query().await?;
        self.set(key, &value, ttl);
        Ok(value)
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
