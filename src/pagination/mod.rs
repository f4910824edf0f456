//! Pagination engine.
//!
//! Two independent strategies:
//!
//! | Strategy | Needs count query | Cost per page | Use for |
//! |----------|-------------------|---------------|---------|
//! | [`offset`] | yes | grows with offset | catalogues, admin tables |
//! | [`cursor`] | no (fetches `limit + 1`) | bounded | activity feeds, large or fast-changing sets |
//!
//! Both normalize their parameters against [`PaginationConfig`] before any
//! query runs.
//!
//! [`PaginationConfig`]: crate::config::PaginationConfig

pub mod cursor;
pub mod offset;

pub use cursor::{
    execute_cursor_query, CursorDirection, CursorMeta, CursorPage, CursorParams, CursorQuery,
    CursorWindow,
};
pub use offset::{
    execute_paginated_query, paginate, OffsetQuery, PageWindow, Paginated, PaginationMeta,
    PaginationParams,
};
