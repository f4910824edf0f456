//! # datalayer-kit
//!
//! Performance layer for the data-access code of a learning platform.
//!
//! ## Features
//!
//! - **Result cache:** bounded in-process cache with per-entry TTL, LRU
//!   eviction and regex-pattern invalidation ([`ResultCache`])
//! - **Key registry:** canonical key builders ([`CacheKeys`]) paired with an
//!   enumerated set of invalidation patterns ([`KeyPattern`])
//! - **Invalidation rules:** one routine per write event ([`Invalidator`])
//! - **Pagination:** offset pagination with concurrent count query, and
//!   cursor pagination without one ([`pagination`])
//! - **Transactions:** all-or-nothing batches over any
//!   [`TransactionalStore`] ([`TransactionExecutor`])
//! - **Profiler:** latency and failure tracking with a bounded history
//!   ([`QueryProfiler`])
//!
//! ## Quick Start
//!
//! ```
//! use datalayer_kit::{CacheKeys, DataLayer, LayerConfig, PaginationParams, TtlClass};
//!
//! # #[tokio::main]
//! # async fn main() -> datalayer_kit::Result<()> {
//! // Build once at startup, clone into handlers.
//! let layer = DataLayer::new(LayerConfig::default());
//!
//! let courses: Vec<u64> = (1..=45).collect();
//! let page = layer
//!     .execute_paginated_query(
//!         |w| {
//!             let courses = &courses;
//!             async move {
//!                 Ok(courses.iter().skip(w.offset as usize).take(w.limit as usize).copied().collect())
//!             }
//!         },
//!         async { Ok(courses.len() as u64) },
//!         PaginationParams::new(3, 20),
//!     )
//!     .await?;
//! assert_eq!(page.items.len(), 5);
//! assert!(page.meta.has_prev);
//!
//! let title: String = layer
//!     .cached_query("get_course", &CacheKeys::course(1), TtlClass::Static, || async {
//!         Ok("Intro to Rust".to_string())
//!     })
//!     .await?;
//! assert_eq!(title, "Intro to Rust");
//!
//! layer.shutdown();
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;

pub mod cache;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod key;
pub mod observability;
pub mod pagination;
pub mod profiler;
pub mod serialization;
pub mod service;
pub mod transaction;

// Re-exports for convenience
pub use cache::{CacheStats, ResultCache};
pub use config::{CacheConfig, LayerConfig, PaginationConfig, ProfilerConfig, TtlClass};
pub use error::{Error, ErrorKind, Result};
pub use invalidation::Invalidator;
pub use key::{CacheKeys, EntityKind, KeyPattern};
pub use observability::{AtomicMetrics, CacheMetrics, NoOpMetrics};
pub use pagination::{
    CursorDirection, CursorPage, CursorParams, CursorQuery, OffsetQuery, Paginated,
    PaginationMeta, PaginationParams,
};
pub use profiler::{QueryMetric, QueryProfiler, QueryStats};
pub use service::DataLayer;
pub use transaction::{
    InMemoryStore, Mutation, MutationOutcome, Record, RecordId, TransactionBatch,
    TransactionExecutor, TransactionScope, TransactionalStore,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
