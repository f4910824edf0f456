//! Query latency profiler.
//!
//! [`QueryProfiler::profile`] wraps any `Result`-returning future, times it,
//! and records a [`QueryMetric`] whether it succeeds or fails. Metrics live
//! in a bounded ring buffer; once `max_metrics` is reached the oldest metric
//! is dropped for each new one. Operations slower than the configured
//! threshold are logged with `warn!` when recorded.
//!
//! A panicking operation is recorded as a failure before the panic resumes.
//! A disabled profiler still runs the wrapped operation but records nothing.

use crate::config::ProfilerConfig;
use crate::error::Result;
use crate::transaction::panic_message;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// One timed operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryMetric {
    pub operation_name: String,
    pub duration_ms: f64,
    /// Wall-clock completion time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl QueryMetric {
    pub fn success(operation_name: impl Into<String>, duration_ms: f64) -> Self {
        QueryMetric {
            operation_name: operation_name.into(),
            duration_ms,
            timestamp_ms: now_ms(),
            success: true,
            error_message: None,
            context: None,
        }
    }

    pub fn failure(
        operation_name: impl Into<String>,
        duration_ms: f64,
        error_message: impl Into<String>,
    ) -> Self {
        QueryMetric {
            success: false,
            error_message: Some(error_message.into()),
            ..QueryMetric::success(operation_name, duration_ms)
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Aggregate over every stored metric of one operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    pub operation_name: String,
    pub count: u64,
    pub total_time_ms: f64,
    pub avg_time_ms: f64,
    pub min_time_ms: f64,
    pub max_time_ms: f64,
    pub success_count: u64,
    /// Fraction of successful runs in `[0, 1]`.
    pub success_rate: f64,
}

impl QueryStats {
    fn start(metric: &QueryMetric) -> Self {
        QueryStats {
            operation_name: metric.operation_name.clone(),
            count: 0,
            total_time_ms: 0.0,
            avg_time_ms: 0.0,
            min_time_ms: f64::INFINITY,
            max_time_ms: 0.0,
            success_count: 0,
            success_rate: 0.0,
        }
    }

    fn fold(&mut self, metric: &QueryMetric) {
        self.count += 1;
        self.total_time_ms += metric.duration_ms;
        self.min_time_ms = self.min_time_ms.min(metric.duration_ms);
        self.max_time_ms = self.max_time_ms.max(metric.duration_ms);
        if metric.success {
            self.success_count += 1;
        }
        self.avg_time_ms = self.total_time_ms / self.count as f64;
        self.success_rate = self.success_count as f64 / self.count as f64;
    }
}

#[derive(Serialize)]
struct ProfilerExport<'a> {
    slow_query_threshold_ms: u64,
    stats: &'a BTreeMap<String, QueryStats>,
    metrics: &'a [QueryMetric],
}

/// Shared profiler. Clones record into the same buffer.
#[derive(Clone)]
pub struct QueryProfiler {
    config: Arc<ProfilerConfig>,
    enabled: Arc<AtomicBool>,
    metrics: Arc<Mutex<VecDeque<QueryMetric>>>,
}

impl QueryProfiler {
    pub fn new(config: ProfilerConfig) -> Self {
        QueryProfiler {
            enabled: Arc::new(AtomicBool::new(config.enabled)),
            metrics: Arc::new(Mutex::new(VecDeque::with_capacity(config.max_metrics.min(1024)))),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        info!("Query profiler {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Time `operation` and record the outcome under `operation_name`.
    ///
    /// The operation's result is returned unchanged.
    ///
    /// # Example
    ///
    /// ```
    /// use datalayer_kit::config::ProfilerConfig;
    /// use datalayer_kit::profiler::QueryProfiler;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> datalayer_kit::Result<()> {
    /// let profiler = QueryProfiler::new(ProfilerConfig::default().with_enabled(true));
    /// let total = profiler
    ///     .profile("count_enrollments", None, async { Ok(42u64) })
    ///     .await?;
    ///
    /// assert_eq!(total, 42);
    /// assert_eq!(profiler.stats()["count_enrollments"].count, 1);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn profile<T, Fut>(
        &self,
        operation_name: &str,
        context: Option<Value>,
        operation: Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        if !self.is_enabled() {
            return operation.await;
        }

        let started = Instant::now();
        let outcome = AssertUnwindSafe(operation).catch_unwind().await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let metric = match &outcome {
            Ok(Ok(_)) => QueryMetric::success(operation_name, duration_ms),
            Ok(Err(e)) => QueryMetric::failure(operation_name, duration_ms, e.to_string()),
            Err(panic) => QueryMetric::failure(
                operation_name,
                duration_ms,
                format!("panicked: {}", panic_message(&**panic)),
            ),
        };
        self.record(match context {
            Some(context) => metric.with_context(context),
            None => metric,
        });

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Store a metric, dropping the oldest once the buffer is full.
    pub fn record(&self, metric: QueryMetric) {
        if !self.is_enabled() || self.config.max_metrics == 0 {
            return;
        }

        if metric.duration_ms > self.config.slow_query_threshold_ms as f64 {
            warn!(
                "Slow query {}: {:.1}ms (threshold {}ms)",
                metric.operation_name, metric.duration_ms, self.config.slow_query_threshold_ms
            );
        }
        if let Some(message) = &metric.error_message {
            debug!("Query {} failed: {}", metric.operation_name, message);
        }

        let mut metrics = self.metrics.lock();
        while metrics.len() >= self.config.max_metrics {
            metrics.pop_front();
        }
        metrics.push_back(metric);
    }

    /// Per-operation aggregates, keyed by operation name.
    pub fn stats(&self) -> BTreeMap<String, QueryStats> {
        let metrics = self.metrics.lock();
        let mut stats: BTreeMap<String, QueryStats> = BTreeMap::new();
        for metric in metrics.iter() {
            stats
                .entry(metric.operation_name.clone())
                .or_insert_with(|| QueryStats::start(metric))
                .fold(metric);
        }
        stats
    }

    pub fn stats_for(&self, operation_name: &str) -> Option<QueryStats> {
        let metrics = self.metrics.lock();
        metrics
            .iter()
            .filter(|m| m.operation_name == operation_name)
            .fold(None, |acc: Option<QueryStats>, metric| {
                let mut stats = acc.unwrap_or_else(|| QueryStats::start(metric));
                stats.fold(metric);
                Some(stats)
            })
    }

    /// Metrics above the slow threshold, oldest first.
    pub fn slow_queries(&self) -> Vec<QueryMetric> {
        let threshold = self.config.slow_query_threshold_ms as f64;
        self.filtered(|m| m.duration_ms > threshold)
    }

    /// The `limit` longest-running metrics, slowest first.
    pub fn slowest_queries(&self, limit: usize) -> Vec<QueryMetric> {
        let mut metrics = self.filtered(|_| true);
        metrics.sort_by(|a, b| b.duration_ms.total_cmp(&a.duration_ms));
        metrics.truncate(limit);
        metrics
    }

    pub fn failed_queries(&self) -> Vec<QueryMetric> {
        self.filtered(|m| !m.success)
    }

    fn filtered(&self, keep: impl Fn(&QueryMetric) -> bool) -> Vec<QueryMetric> {
        self.metrics.lock().iter().filter(|m| keep(m)).cloned().collect()
    }

    /// Human-readable summary of every operation plus the slowest calls.
    pub fn report(&self) -> String {
        let stats = self.stats();
        let mut out = String::from("Query performance report\n");

        if stats.is_empty() {
            out.push_str("  no queries recorded\n");
            return out;
        }

        let mut by_avg: Vec<&QueryStats> = stats.values().collect();
        by_avg.sort_by(|a, b| b.avg_time_ms.total_cmp(&a.avg_time_ms));
        for s in by_avg {
            let _ = writeln!(
                out,
                "  {}: count={} avg={:.2}ms min={:.2}ms max={:.2}ms success={:.1}%",
                s.operation_name,
                s.count,
                s.avg_time_ms,
                s.min_time_ms,
                s.max_time_ms,
                s.success_rate * 100.0
            );
        }

        let slow = self.slow_queries();
        let _ = writeln!(
            out,
            "Slow queries (> {}ms): {}",
            self.config.slow_query_threshold_ms,
            slow.len()
        );
        for metric in self.slowest_queries(5) {
            let _ = writeln!(out, "  {} {:.2}ms", metric.operation_name, metric.duration_ms);
        }
        out
    }

    /// Stored metrics and their aggregates as a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::Database` if a metric context fails to serialize.
    pub fn export_json(&self) -> Result<String> {
        let stats = self.stats();
        let metrics: Vec<QueryMetric> = self.filtered(|_| true);
        let export = ProfilerExport {
            slow_query_threshold_ms: self.config.slow_query_threshold_ms,
            stats: &stats,
            metrics: &metrics,
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    pub fn clear(&self) {
        self.metrics.lock().clear();
        info!("Query profiler cleared");
    }

    pub fn len(&self) -> usize {
        self.metrics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.lock().is_empty()
    }
}

impl Default for QueryProfiler {
    fn default() -> Self {
        Self::new(ProfilerConfig::default())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
