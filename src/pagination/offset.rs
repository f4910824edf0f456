//! Offset (page-number) pagination.

use crate::config::PaginationConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Requested page. Normalize with [`PaginationParams::validate`] before use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationParams {
    pub page: u64,
    pub page_size: u64,
}

impl PaginationParams {
    pub fn new(page: u64, page_size: u64) -> Self {
        PaginationParams { page, page_size }
    }

    /// Build normalized params from raw, possibly missing or negative input
    /// (e.g. query-string values).
    pub fn from_raw(page: Option<i64>, page_size: Option<i64>, config: &PaginationConfig) -> Self {
        let page = page.map_or(1, |p| p.max(1) as u64);
        let page_size = page_size.map_or(config.default_page_size, |s| s.max(0) as u64);
        PaginationParams::new(page, page_size).validate(config)
    }

    /// Clamp `page` to at least 1 and `page_size` into `[min, max]`.
    pub fn validate(self, config: &PaginationConfig) -> Self {
        PaginationParams {
            page: self.page.max(1),
            page_size: self
                .page_size
                .clamp(config.min_page_size, config.max_page_size.max(config.min_page_size)),
        }
    }

    /// Rows to skip. Assumes normalized params.
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }

    pub fn window(&self) -> PageWindow {
        PageWindow {
            offset: self.offset(),
            limit: self.page_size,
        }
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        let config = PaginationConfig::default();
        PaginationParams::new(1, config.default_page_size)
    }
}

/// `OFFSET`/`LIMIT` pair handed to the data query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: u64,
    pub limit: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub page: u64,
    pub page_size: u64,
    pub total_items: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PaginationMeta {
    /// Derive metadata from normalized params and the total row count.
    pub fn new(params: PaginationParams, total_items: u64) -> Self {
        let total_pages = if params.page_size == 0 {
            0
        } else {
            total_items.div_ceil(params.page_size)
        };

        PaginationMeta {
            page: params.page,
            page_size: params.page_size,
            total_items,
            total_pages,
            has_next: params.page < total_pages,
            // An empty result set has no pages to go back to.
            has_prev: params.page > 1 && total_pages > 0,
        }
    }
}

/// One page of items plus its metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub meta: PaginationMeta,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, params: PaginationParams, total_items: u64) -> Self {
        Paginated {
            items,
            meta: PaginationMeta::new(params, total_items),
        }
    }

    pub fn empty(params: PaginationParams) -> Self {
        Self::new(Vec::new(), params, 0)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            meta: self.meta,
        }
    }
}

/// Reusable data + count query pair.
pub trait OffsetQuery: Send + Sync {
    type Item;

    /// Fetch the rows inside `window`, in a stable order.
    fn fetch(&self, window: PageWindow) -> impl Future<Output = Result<Vec<Self::Item>>> + Send;

    /// Count every row the unpaginated query would return.
    fn count(&self) -> impl Future<Output = Result<u64>> + Send;
}

/// Run a data query and a count query concurrently and combine them.
///
/// `params` is normalized first; `data_query` receives the resulting window.
///
/// # Example
///
/// ```
/// use datalayer_kit::config::PaginationConfig;
/// use datalayer_kit::pagination::{execute_paginated_query, PaginationParams};
///
/// # #[tokio::main]
/// # async fn main() -> datalayer_kit::Result<()> {
/// let rows: Vec<u64> = (1..=95).collect();
/// let page = execute_paginated_query(
///     |w| {
///         let rows = &rows;
///         async move {
///             Ok(rows.iter().skip(w.offset as usize).take(w.limit as usize).copied().collect())
///         }
///     },
///     async { Ok(rows.len() as u64) },
///     PaginationParams::new(5, 20),
///     &PaginationConfig::default(),
/// )
/// .await?;
///
/// assert_eq!(page.items.len(), 15);
/// assert_eq!(page.meta.total_pages, 5);
/// assert!(!page.meta.has_next);
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns the first error of either query.
pub async fn execute_paginated_query<T, D, DFut, CFut>(
    data_query: D,
    count_query: CFut,
    params: PaginationParams,
    config: &PaginationConfig,
) -> Result<Paginated<T>>
where
    D: FnOnce(PageWindow) -> DFut,
    DFut: Future<Output = Result<Vec<T>>>,
    CFut: Future<Output = Result<u64>>,
{
    let params = params.validate(config);
    let (items, total_items) = futures::try_join!(data_query(params.window()), count_query)?;

    debug!(
        "Paginated query page={} size={} -> {} items of {}",
        params.page,
        params.page_size,
        items.len(),
        total_items
    );
    Ok(Paginated::new(items, params, total_items))
}

/// Paginate an [`OffsetQuery`].
///
/// # Errors
///
/// Returns the first error of the fetch or count query.
pub async fn paginate<Q: OffsetQuery>(
    query: &Q,
    params: PaginationParams,
    config: &PaginationConfig,
) -> Result<Paginated<Q::Item>> {
    execute_paginated_query(|window| query.fetch(window), query.count(), params, config).await
}
