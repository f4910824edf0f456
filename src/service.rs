//! Shared data-access service.
//!
//! [`DataLayer`] bundles one result cache, its invalidator, one query
//! profiler, and the pagination bounds. Build it once at process start and
//! clone it into request handlers; clones share all state.

use crate::cache::ResultCache;
use crate::config::{LayerConfig, PaginationConfig};
use crate::error::Result;
use crate::invalidation::Invalidator;
use crate::observability::CacheMetrics;
use crate::pagination::{
    self, CursorPage, CursorParams, CursorQuery, OffsetQuery, PageWindow, Paginated,
    PaginationParams,
};
use crate::profiler::QueryProfiler;
use crate::transaction::{TransactionExecutor, TransactionalStore};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Cache, invalidation rules, profiler and pagination behind one handle.
///
/// # Example
///
/// ```
/// use datalayer_kit::{CacheKeys, DataLayer, LayerConfig, TtlClass};
///
/// # #[tokio::main]
/// # async fn main() -> datalayer_kit::Result<()> {
/// let layer = DataLayer::new(LayerConfig::default());
///
/// let key = CacheKeys::course_modules(7);
/// let modules: Vec<String> = layer
///     .cached_query("course_modules", &key, TtlClass::Frequent, || async {
///         Ok(vec!["Ownership".to_string(), "Lifetimes".to_string()])
///     })
///     .await?;
/// assert_eq!(modules.len(), 2);
///
/// // A module write drops the cached listing.
/// layer.invalidator().on_module_update(3, 7);
/// assert!(!layer.cache().contains(&key));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DataLayer {
    cache: ResultCache,
    invalidator: Invalidator,
    profiler: QueryProfiler,
    pagination: Arc<PaginationConfig>,
}

impl DataLayer {
    pub fn new(config: LayerConfig) -> Self {
        let cache = ResultCache::new(config.cache);
        info!(
            "DataLayer started: cache max_entries={}, profiler enabled={}",
            cache.config().max_entries,
            config.profiler.enabled
        );

        DataLayer {
            invalidator: Invalidator::new(cache.clone()),
            cache,
            profiler: QueryProfiler::new(config.profiler),
            pagination: Arc::new(config.pagination),
        }
    }

    /// Build from [`LayerConfig::from_env`].
    pub fn from_env() -> Self {
        Self::new(LayerConfig::from_env())
    }

    /// Report cache events to `metrics`. Call before cloning the layer.
    pub fn with_cache_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.cache = self.cache.with_metrics(metrics);
        self.invalidator = Invalidator::new(self.cache.clone());
        self
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn invalidator(&self) -> &Invalidator {
        &self.invalidator
    }

    pub fn profiler(&self) -> &QueryProfiler {
        &self.profiler
    }

    pub fn pagination_config(&self) -> &PaginationConfig {
        &self.pagination
    }

    /// See [`ResultCache::with_cache`].
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
        self.cache.with_cache(key, ttl, query).await
    }

    /// See [`QueryProfiler::profile`].
    ///
    /// # Errors
    ///
    /// Returns the operation's error unchanged.
    pub async fn profile_query<T, Fut>(
        &self,
        name: &str,
        context: Option<Value>,
        operation: Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.profiler.profile(name, context, operation).await
    }

    /// Profile a cache-through read. Hits are recorded too, so the profile
    /// reflects what callers actually wait for.
    ///
    /// # Errors
    ///
    /// Returns whatever error `query` returns; errors are never cached.
    pub async fn cached_query<T, F, Fut>(
        &self,
        name: &str,
        key: &str,
        ttl: impl Into<Duration>,
        query: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.profiler
            .profile(
                name,
                Some(json!({ "cache_key": key })),
                self.cache.with_cache(key, ttl, query),
            )
            .await
    }

    /// Offset pagination with this layer's bounds.
    ///
    /// # Errors
    ///
    /// Returns the first error of either query.
    pub async fn execute_paginated_query<T, D, DFut, CFut>(
        &self,
        data_query: D,
        count_query: CFut,
        params: PaginationParams,
    ) -> Result<Paginated<T>>
    where
        D: FnOnce(PageWindow) -> DFut,
        DFut: Future<Output = Result<Vec<T>>>,
        CFut: Future<Output = Result<u64>>,
    {
        pagination::execute_paginated_query(data_query, count_query, params, &self.pagination)
            .await
    }

    /// Profile and cache one page of an [`OffsetQuery`].
    ///
    /// `params` is normalized before `key_for` sees it, so equivalent
    /// requests (page 0 and page 1, size 500 and size 100) share one entry.
    ///
    /// # Errors
    ///
    /// Returns the first error of the fetch or count query.
    pub async fn paginated_cached_query<Q>(
        &self,
        name: &str,
        key_for: impl FnOnce(&PaginationParams) -> String,
        ttl: impl Into<Duration>,
        query: &Q,
        params: PaginationParams,
    ) -> Result<Paginated<Q::Item>>
    where
        Q: OffsetQuery,
        Q::Item: Serialize + DeserializeOwned,
    {
        let params = params.validate(&self.pagination);
        let key = key_for(&params);
        self.cached_query(name, &key, ttl, || {
            pagination::paginate(query, params, &self.pagination)
        })
        .await
    }

    /// Profile one cursor page.
    ///
    /// # Errors
    ///
    /// Returns the query's error unchanged.
    pub async fn execute_cursor_query<Q: CursorQuery>(
        &self,
        name: &str,
        query: &Q,
        params: CursorParams<Q::Cursor>,
    ) -> Result<CursorPage<Q::Item, Q::Cursor>> {
        self.profiler
            .profile(
                name,
                None,
                pagination::execute_cursor_query(query, params, &self.pagination),
            )
            .await
    }

    /// Run [`TransactionExecutor::with_transaction`] under the profiler.
    ///
    /// # Errors
    ///
    /// Same as [`TransactionExecutor::with_transaction`].
    pub async fn profiled_transaction<S, T, F>(
        &self,
        executor: &TransactionExecutor<S>,
        name: &str,
        callback: F,
    ) -> Result<T>
    where
        S: TransactionalStore,
        F: for<'s> FnOnce(&'s mut S::Scope) -> BoxFuture<'s, Result<T>>,
    {
        self.profiler
            .profile(name, None, executor.with_transaction(callback))
            .await
    }

    /// Stop the cache sweeper and empty the cache. Profiler metrics are kept
    /// so a final report can still be taken.
    pub fn shutdown(&self) {
        self.cache.shutdown();
        info!("DataLayer shut down");
    }
}

impl Default for DataLayer {
    fn default() -> Self {
        Self::new(LayerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProfilerConfig, TtlClass};
    use crate::error::{Error, ErrorKind};
    use crate::key::CacheKeys;
    use crate::transaction::{InMemoryStore, TransactionScope};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn layer() -> DataLayer {
        DataLayer::new(
            LayerConfig::default().with_profiler(ProfilerConfig::default().with_enabled(true)),
        )
    }

    struct Catalogue {
        rows: Vec<u64>,
        fetches: AtomicUsize,
    }

    impl OffsetQuery for Catalogue {
        type Item = u64;

        async fn fetch(&self, window: PageWindow) -> Result<Vec<u64>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .rows
                .iter()
                .skip(window.offset as usize)
                .take(window.limit as usize)
                .copied()
                .collect())
        }

        async fn count(&self) -> Result<u64> {
            Ok(self.rows.len() as u64)
        }
    }

    #[tokio::test]
    async fn test_cached_query_runs_once() {
        let layer = layer();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: u64 = layer
                .cached_query("course_stats", "course:1:stats", TtlClass::Realtime, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(12)
                })
                .await
                .unwrap();
            assert_eq!(value, 12);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(layer.profiler().stats_for("course_stats").unwrap().count, 3);
        assert_eq!(layer.cache().stats().hits, 2);
    }

    #[tokio::test]
    async fn test_cached_query_error_not_cached() {
        let layer = layer();
        let result: Result<u64> = layer
            .cached_query("course", "course:9", TtlClass::Static, || async {
                Err(Error::not_found("course 9"))
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
        assert!(!layer.cache().contains("course:9"));
        assert_eq!(layer.profiler().failed_queries().len(), 1);
    }

    #[tokio::test]
    async fn test_paginated_cached_query_normalizes_key() {
        let layer = layer();
        let catalogue = Catalogue {
            rows: (1..=95).collect(),
            fetches: AtomicUsize::new(0),
        };

        let first = layer
            .paginated_cached_query(
                "published_courses",
                |p| CacheKeys::published_courses(p.page, p.page_size),
                TtlClass::List,
                &catalogue,
                PaginationParams::new(0, 500),
            )
            .await
            .unwrap();
        assert_eq!(first.items.len(), 95);
        assert_eq!(first.meta.page_size, 100);

        let again = layer
            .paginated_cached_query(
                "published_courses",
                |p| CacheKeys::published_courses(p.page, p.page_size),
                TtlClass::List,
                &catalogue,
                PaginationParams::new(1, 100),
            )
            .await
            .unwrap();

        assert_eq!(again, first);
        assert_eq!(catalogue.fetches.load(Ordering::SeqCst), 1);
        assert!(layer.cache().contains(&CacheKeys::published_courses(1, 100)));
    }

    #[tokio::test]
    async fn test_profiled_transaction() {
        let layer = layer();
        let executor = TransactionExecutor::new(InMemoryStore::new());

        let id = layer
            .profiled_transaction(&executor, "create_course", |tx| {
                Box::pin(async move {
                    Ok(tx.insert("courses", json!({ "title": "Rust" })).await?.id)
                })
            })
            .await
            .unwrap();

        assert_eq!(id, 1);
        assert_eq!(layer.profiler().stats_for("create_course").unwrap().success_count, 1);
    }

    #[test]
    fn test_clones_share_state() {
        let layer = layer();
        let clone = layer.clone();
        clone.cache().set("course:1", &1u8, TtlClass::Static);

        assert!(layer.cache().contains("course:1"));
        assert_eq!(layer.invalidator().on_course_update(1, None::<u64>), 1);
        assert!(clone.cache().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_sweeper() {
        let layer = layer();
        layer.cache().spawn_sweeper(Duration::from_secs(60));
        layer.shutdown();
        layer.cache().set("course:1", &1u8, TtlClass::Static);
        assert_eq!(layer.cache().get::<u8>("course:1"), Some(1));
    }
}
