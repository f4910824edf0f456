//! Cursor (keyset) pagination.
//!
//! The query filters strictly past the cursor on one orderable column and
//! fetches `limit + 1` rows; the extra row only signals that more exist and
//! is never returned. No count query is issued.

use crate::config::PaginationConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorDirection {
    /// Rows with cursor column `>` the cursor, ascending.
    #[default]
    Forward,
    /// Rows with cursor column `<` the cursor, descending.
    Backward,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorParams<C> {
    /// Last-seen cursor value; `None` starts from the edge of the set.
    pub cursor: Option<C>,
    pub limit: u64,
    pub direction: CursorDirection,
}

impl<C> CursorParams<C> {
    pub fn forward(cursor: Option<C>, limit: u64) -> Self {
        CursorParams {
            cursor,
            limit,
            direction: CursorDirection::Forward,
        }
    }

    pub fn backward(cursor: Option<C>, limit: u64) -> Self {
        CursorParams {
            cursor,
            limit,
            direction: CursorDirection::Backward,
        }
    }

    /// Clamp `limit` into the configured page-size bounds.
    pub fn validate(mut self, config: &PaginationConfig) -> Self {
        self.limit = self
            .limit
            .clamp(config.min_page_size, config.max_page_size.max(config.min_page_size));
        self
    }
}

/// What the cursor query must fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CursorWindow<C> {
    pub cursor: Option<C>,
    pub direction: CursorDirection,
    /// Requested limit plus one.
    pub fetch_limit: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorMeta<C> {
    pub next_cursor: Option<C>,
    pub previous_cursor: Option<C>,
    pub has_more: bool,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPage<T, C> {
    pub items: Vec<T>,
    pub meta: CursorMeta<C>,
}

/// Query over one orderable cursor column.
pub trait CursorQuery: Send + Sync {
    type Item;
    type Cursor: Clone;

    /// Cursor column value of `item`.
    fn cursor_of(&self, item: &Self::Item) -> Self::Cursor;

    /// Fetch up to `window.fetch_limit` rows strictly past `window.cursor`,
    /// ordered in `window.direction`.
    fn fetch(
        &self,
        window: CursorWindow<Self::Cursor>,
    ) -> impl Future<Output = Result<Vec<Self::Item>>> + Send;
}

/// Fetch one cursor page.
///
/// Items keep the order the query returned them in. With `limit = 20`, 20
/// matching rows yield `has_more = false` and no `next_cursor`; 21 rows yield
/// 20 items and `has_more = true`.
///
/// # Errors
///
/// Returns the query's error unchanged.
pub async fn execute_cursor_query<Q: CursorQuery>(
    query: &Q,
    params: CursorParams<Q::Cursor>,
    config: &PaginationConfig,
) -> Result<CursorPage<Q::Item, Q::Cursor>> {
    let params = params.validate(config);
    let limit = params.limit as usize;

    let mut items = query
        .fetch(CursorWindow {
            cursor: params.cursor,
            direction: params.direction,
            fetch_limit: params.limit + 1,
        })
        .await?;

    let has_more = items.len() > limit;
    items.truncate(limit);

    let next_cursor = if has_more {
        items.last().map(|item| query.cursor_of(item))
    } else {
        None
    };
    let previous_cursor = items.first().map(|item| query.cursor_of(item));

    debug!(
        "Cursor query ({:?}, limit {}) -> {} items, has_more={}",
        params.direction,
        limit,
        items.len(),
        has_more
    );

    Ok(CursorPage {
        meta: CursorMeta {
            next_cursor,
            previous_cursor,
            has_more,
            count: items.len(),
        },
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rows ordered by id.
    struct Feed(Vec<u64>);

    impl CursorQuery for Feed {
        type Item = u64;
        type Cursor = u64;

        fn cursor_of(&self, item: &u64) -> u64 {
            *item
        }

        async fn fetch(&self, window: CursorWindow<u64>) -> Result<Vec<u64>> {
            let take = window.fetch_limit as usize;
            Ok(match window.direction {
                CursorDirection::Forward => self
                    .0
                    .iter()
                    .filter(|id| window.cursor.map_or(true, |c| **id > c))
                    .take(take)
                    .copied()
                    .collect(),
                CursorDirection::Backward => self
                    .0
                    .iter()
                    .rev()
                    .filter(|id| window.cursor.map_or(true, |c| **id < c))
                    .take(take)
                    .copied()
                    .collect(),
            })
        }
    }

    fn config() -> PaginationConfig {
        PaginationConfig::default()
    }

    #[tokio::test]
    async fn test_exact_limit_has_no_more() {
        let feed = Feed((1..=20).collect());
        let page = execute_cursor_query(&feed, CursorParams::forward(None, 20), &config())
            .await
            .unwrap();

        assert_eq!(page.items.len(), 20);
        assert!(!page.meta.has_more);
        assert_eq!(page.meta.next_cursor, None);
        assert_eq!(page.meta.previous_cursor, Some(1));
    }

    #[tokio::test]
    async fn test_one_extra_row_sets_has_more() {
        let feed = Feed((1..=21).collect());
        let page = execute_cursor_query(&feed, CursorParams::forward(None, 20), &config())
            .await
            .unwrap();

        assert_eq!(page.items.len(), 20);
        assert_eq!(page.meta.count, 20);
        assert!(page.meta.has_more);
        assert_eq!(page.meta.next_cursor, Some(20));
    }

    #[tokio::test]
    async fn test_walk_forward_then_back() {
        let feed = Feed((1..=25).collect());

        let first = execute_cursor_query(&feed, CursorParams::forward(None, 10), &config())
            .await
            .unwrap();
        let second = execute_cursor_query(
            &feed,
            CursorParams::forward(first.meta.next_cursor, 10),
            &config(),
        )
        .await
        .unwrap();
        assert_eq!(second.items, (11..=20).collect::<Vec<_>>());

        let back = execute_cursor_query(
            &feed,
            CursorParams::backward(second.meta.previous_cursor, 10),
            &config(),
        )
        .await
        .unwrap();
        assert_eq!(back.items, (1..=10).rev().collect::<Vec<_>>());
        assert!(!back.meta.has_more);
    }

    #[tokio::test]
    async fn test_empty_result() {
        let feed = Feed(vec![]);
        let page = execute_cursor_query(&feed, CursorParams::forward(Some(3), 10), &config())
            .await
            .unwrap();

        assert!(page.items.is_empty());
        assert!(!page.meta.has_more);
        assert_eq!(page.meta.next_cursor, None);
        assert_eq!(page.meta.previous_cursor, None);
    }

    #[tokio::test]
    async fn test_zero_limit_is_clamped() {
        let feed = Feed((1..=5).collect());
        let page = execute_cursor_query(&feed, CursorParams::forward(None, 0), &config())
            .await
            .unwrap();

        assert_eq!(page.items, vec![1]);
        assert!(page.meta.has_more);
    }
}
