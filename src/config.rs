//! Configuration for the cache, pagination engine and profiler.
//!
//! Every struct is `Default` with the production constants and exposes
//! builder-style `with_*` setters:
//!
//! ```
//! use datalayer_kit::config::{CacheConfig, LayerConfig, ProfilerConfig};
//!
//! let config = LayerConfig::default()
//!     .with_cache(CacheConfig::default().with_max_entries(500))
//!     .with_profiler(ProfilerConfig::default().with_slow_query_threshold_ms(250));
//!
//! assert_eq!(config.cache.max_entries, 500);
//! ```
//!
//! [`LayerConfig::from_env`] applies overrides from `DATALAYER_*` environment
//! variables on top of the defaults. Values that fail to parse are ignored.

use std::time::Duration;

/// Default maximum number of cache entries.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Default page size when the caller gives none.
pub const DEFAULT_PAGE_SIZE: u64 = 20;
/// Largest accepted page size; bigger requests are clamped.
pub const MAX_PAGE_SIZE: u64 = 100;
/// Smallest accepted page size; smaller requests are clamped.
pub const MIN_PAGE_SIZE: u64 = 1;

/// Default slow-operation threshold in milliseconds.
pub const DEFAULT_SLOW_QUERY_THRESHOLD_MS: u64 = 1000;
/// Default size of the profiler's metric history.
pub const DEFAULT_MAX_METRICS: usize = 1000;

/// TTL classes for cached query results.
///
/// | Class | TTL | Typical use |
/// |-------|-----|-------------|
/// | `Static` | 300s | Course and quiz definitions |
/// | `Frequent` | 120s | Module/chapter listings |
/// | `Realtime` | 30s | Progress and attempt data |
/// | `Dashboard` | 60s | Student/teacher dashboards |
/// | `List` | 180s | Paginated catalogue listings |
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TtlClass {
    Static,
    Frequent,
    Realtime,
    Dashboard,
    List,
}

impl TtlClass {
    pub fn seconds(&self) -> u64 {
        match self {
            TtlClass::Static => 300,
            TtlClass::Frequent => 120,
            TtlClass::Realtime => 30,
            TtlClass::Dashboard => 60,
            TtlClass::List => 180,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.seconds())
    }
}

impl From<TtlClass> for Duration {
    fn from(class: TtlClass) -> Self {
        class.duration()
    }
}

/// Result cache configuration.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Maximum number of live entries before LRU eviction.
    pub max_entries: usize,
    /// TTL used by `set` callers that do not pick a class.
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_entries: DEFAULT_MAX_ENTRIES,
            default_ttl: TtlClass::Frequent.duration(),
        }
    }
}

impl CacheConfig {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// Offset pagination bounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaginationConfig {
    pub default_page_size: u64,
    pub min_page_size: u64,
    pub max_page_size: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        PaginationConfig {
            default_page_size: DEFAULT_PAGE_SIZE,
            min_page_size: MIN_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl PaginationConfig {
    pub fn with_max_page_size(mut self, max_page_size: u64) -> Self {
        self.max_page_size = max_page_size.max(self.min_page_size);
        self
    }

    pub fn with_default_page_size(mut self, page_size: u64) -> Self {
        self.default_page_size = page_size;
        self
    }
}

/// Query profiler configuration.
#[derive(Clone, Debug)]
pub struct ProfilerConfig {
    /// When false, wrapped operations run but nothing is recorded.
    pub enabled: bool,
    /// Operations slower than this are logged at record time.
    pub slow_query_threshold_ms: u64,
    /// Capacity of the metric ring buffer.
    pub max_metrics: usize,
}

impl Default for ProfilerConfig {
    /// Enabled everywhere except production (`DATALAYER_ENV=production`).
    fn default() -> Self {
        ProfilerConfig {
            enabled: !is_production(),
            slow_query_threshold_ms: DEFAULT_SLOW_QUERY_THRESHOLD_MS,
            max_metrics: DEFAULT_MAX_METRICS,
        }
    }
}

impl ProfilerConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_slow_query_threshold_ms(mut self, threshold_ms: u64) -> Self {
        self.slow_query_threshold_ms = threshold_ms;
        self
    }

    pub fn with_max_metrics(mut self, max_metrics: usize) -> Self {
        self.max_metrics = max_metrics;
        self
    }
}

/// Aggregate configuration for a [`crate::DataLayer`].
#[derive(Clone, Debug, Default)]
pub struct LayerConfig {
    pub cache: CacheConfig,
    pub pagination: PaginationConfig,
    pub profiler: ProfilerConfig,
}

impl LayerConfig {
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_pagination(mut self, pagination: PaginationConfig) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn with_profiler(mut self, profiler: ProfilerConfig) -> Self {
        self.profiler = profiler;
        self
    }

    /// Build a configuration from defaults plus environment overrides.
    ///
    /// Priority for each value:
    /// 1. `DATALAYER_CACHE_MAX_ENTRIES`, `DATALAYER_PROFILER_ENABLED`,
    ///    `DATALAYER_SLOW_QUERY_MS`, `DATALAYER_MAX_METRICS` (if set and valid)
    /// 2. The defaults above (`DATALAYER_ENV=production` disables profiling)
    pub fn from_env() -> Self {
        let mut config = LayerConfig::default();

        if let Some(max_entries) = env_parse::<usize>("DATALAYER_CACHE_MAX_ENTRIES") {
            config.cache.max_entries = max_entries;
        }
        if let Some(enabled) = env_parse::<bool>("DATALAYER_PROFILER_ENABLED") {
            config.profiler.enabled = enabled;
        }
        if let Some(threshold) = env_parse::<u64>("DATALAYER_SLOW_QUERY_MS") {
            config.profiler.slow_query_threshold_ms = threshold;
        }
        if let Some(max_metrics) = env_parse::<usize>("DATALAYER_MAX_METRICS") {
            config.profiler.max_metrics = max_metrics;
        }

        debug!(
            "LayerConfig from env: cache.max_entries={}, profiler.enabled={}",
            config.cache.max_entries, config.profiler.enabled
        );
        config
    }
}

fn is_production() -> bool {
    std::env::var("DATALAYER_ENV")
        .map(|v| v.eq_ignore_ascii_case("production"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value for {}: {:?}", name, raw);
            None
        }
    }
}
