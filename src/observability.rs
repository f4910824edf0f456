//! Metric hooks for the result cache.
//!
//! [`ResultCache`](crate::cache::ResultCache) reports every hit, miss, write,
//! delete and eviction to a [`CacheMetrics`] implementation. The default is
//! [`NoOpMetrics`]; [`AtomicMetrics`] keeps lock-free counters that can be
//! scraped by a metrics endpoint:
//!
//! ```
//! use datalayer_kit::cache::ResultCache;
//! use datalayer_kit::config::CacheConfig;
//! use datalayer_kit::observability::AtomicMetrics;
//! use std::sync::Arc;
//!
//! let metrics = Arc::new(AtomicMetrics::new());
//! let cache = ResultCache::new(CacheConfig::default()).with_metrics(metrics.clone());
//! assert_eq!(metrics.evictions(), 0);
//! ```
//!
//! Hooks are called after the cache lock is released, so implementations may
//! be slow without blocking other callers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Why an entry left the cache without an explicit delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionReason {
    /// Capacity reached; least-recently-used entry dropped.
    Capacity,
    /// TTL passed.
    Expired,
    /// Stored bytes could not be decoded as the requested type.
    Undecodable,
}

/// Trait for cache metrics collection.
pub trait CacheMetrics: Send + Sync {
    fn record_hit(&self, key: &str, duration: Duration) {
        debug!("Cache HIT: {} took {:?}", key, duration);
    }

    fn record_miss(&self, key: &str, duration: Duration) {
        debug!("Cache MISS: {} took {:?}", key, duration);
    }

    fn record_set(&self, key: &str, ttl: Duration) {
        debug!("Cache SET: {} (TTL: {:?})", key, ttl);
    }

    /// `removed` is the number of entries actually removed (0 for a no-op).
    fn record_delete(&self, key: &str, removed: usize) {
        debug!("Cache DELETE: {} removed {}", key, removed);
    }

    fn record_eviction(&self, key: &str, reason: EvictionReason) {
        debug!("Cache EVICT: {} ({:?})", key, reason);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str, _duration: Duration) {}
    fn record_miss(&self, _key: &str, _duration: Duration) {}
    fn record_set(&self, _key: &str, _ttl: Duration) {}
    fn record_delete(&self, _key: &str, _removed: usize) {}
    fn record_eviction(&self, _key: &str, _reason: EvictionReason) {}
}

/// Counting metrics backed by atomics.
#[derive(Default)]
pub struct AtomicMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    latency_total_us: AtomicU64,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Average lookup latency in microseconds (0 before any lookup).
    pub fn avg_lookup_us(&self) -> f64 {
        let lookups = self.hits() + self.misses();
        if lookups == 0 {
            return 0.0;
        }
        self.latency_total_us.load(Ordering::Relaxed) as f64 / lookups as f64
    }

    /// Render counters in Prometheus text format.
    pub fn render_prometheus(&self) -> String {
        format!(
            "# TYPE datalayer_cache_hits_total counter\n\
             datalayer_cache_hits_total {}\n\
             # TYPE datalayer_cache_misses_total counter\n\
             datalayer_cache_misses_total {}\n\
             # TYPE datalayer_cache_sets_total counter\n\
             datalayer_cache_sets_total {}\n\
             # TYPE datalayer_cache_evictions_total counter\n\
             datalayer_cache_evictions_total {}\n\
             # TYPE datalayer_cache_avg_lookup_us gauge\n\
             datalayer_cache_avg_lookup_us {:.2}\n",
            self.hits(),
            self.misses(),
            self.sets(),
            self.evictions(),
            self.avg_lookup_us()
        )
    }
}

impl CacheMetrics for AtomicMetrics {
    fn record_hit(&self, _key: &str, duration: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.latency_total_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_miss(&self, _key: &str, duration: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.latency_total_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_set(&self, _key: &str, _ttl: Duration) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delete(&self, _key: &str, removed: usize) {
        self.deletes.fetch_add(removed as u64, Ordering::Relaxed);
    }

    fn record_eviction(&self, _key: &str, _reason: EvictionReason) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }
}
