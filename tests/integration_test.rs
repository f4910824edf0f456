//! Integration tests for datalayer-kit
//!
//! These tests drive the full layer the way a CRUD module would: cached
//! reads, atomic writes through the transaction executor, and the matching
//! invalidation call afterwards.

use datalayer_kit::config::{CacheConfig, ProfilerConfig};
use datalayer_kit::pagination::{CursorWindow, PageWindow};
use datalayer_kit::{
    CacheKeys, CursorDirection, CursorParams, CursorQuery, DataLayer, ErrorKind, InMemoryStore,
    LayerConfig, Mutation, OffsetQuery, PaginationParams, Record, Result, TransactionBatch,
    TransactionExecutor, TransactionScope, TtlClass,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn layer() -> DataLayer {
    init_logging();
    DataLayer::new(
        LayerConfig::default()
            .with_cache(CacheConfig::default().with_max_entries(500))
            .with_profiler(ProfilerConfig::default().with_enabled(true)),
    )
}

fn store() -> InMemoryStore {
    InMemoryStore::new().with_unique("enrollments", &["student", "course"])
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct StudentDashboard {
    student: u64,
    enrolled: u64,
}

async fn student_dashboard(
    layer: &DataLayer,
    store: &InMemoryStore,
    student: u64,
) -> Result<StudentDashboard> {
    layer
        .cached_query(
            "student_dashboard",
            &CacheKeys::student_dashboard(student),
            TtlClass::Dashboard,
            || async {
                let rows = store.rows("enrollments").await;
                let enrolled = rows.iter().filter(|r| r.data["student"] == student).count();
                Ok(StudentDashboard {
                    student,
                    enrolled: enrolled as u64,
                })
            },
        )
        .await
}

/// Test 1: Class assignment flow
///
/// - Dashboards are cached before the write
/// - The whole class is enrolled in one transaction
/// - Invalidation drops the stale dashboards so the next read recomputes
#[tokio::test]
async fn test_class_assignment_flow() {
    let layer = layer();
    let store = store();
    let executor = TransactionExecutor::new(store.clone());
    let class = [1u64, 2, 3];

    for student in class {
        assert_eq!(student_dashboard(&layer, &store, student).await.unwrap().enrolled, 0);
    }
    assert_eq!(layer.cache().len(), 3);

    let created = executor
        .batch_create(
            "enrollments",
            class
                .iter()
                .map(|s| json!({ "student": s, "course": 10 }))
                .collect(),
        )
        .await
        .unwrap();
    assert_eq!(created.len(), 3);

    // Still stale until the invalidation rule runs.
    assert_eq!(student_dashboard(&layer, &store, 1).await.unwrap().enrolled, 0);

    let removed = layer.invalidator().on_class_assignment(4, 10, &class);
    assert_eq!(removed, 3);

    for student in class {
        assert_eq!(student_dashboard(&layer, &store, student).await.unwrap().enrolled, 1);
    }

    let stats = layer.profiler().stats_for("student_dashboard").unwrap();
    assert_eq!(stats.count, 7);
    assert_eq!(stats.success_rate, 1.0);
}

/// Test 2: A duplicate enrollment aborts the whole class assignment
#[tokio::test]
async fn test_failed_assignment_leaves_no_rows() {
    let layer = layer();
    let store = store();
    store
        .seed("enrollments", json!({ "student": 2, "course": 10 }))
        .await
        .unwrap();
    let executor = TransactionExecutor::new(store.clone());

    let before = student_dashboard(&layer, &store, 1).await.unwrap();

    let err = layer
        .profiled_transaction(&executor, "assign_class", |tx| {
            Box::pin(async move {
                let mut rows = Vec::new();
                for student in [1u64, 2, 3] {
                    rows.push(
                        tx.insert("enrollments", json!({ "student": student, "course": 10 }))
                            .await?,
                    );
                }
                Ok(rows)
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    assert_eq!(store.count("enrollments").await, 1);
    assert_eq!(layer.profiler().failed_queries().len(), 1);

    // Nothing committed, nothing to invalidate: the cached view is still right.
    assert_eq!(student_dashboard(&layer, &store, 1).await.unwrap(), before);
}

/// Test 3: Mixed mutation batch followed by course invalidation
#[tokio::test]
async fn test_course_rewrite_batch() {
    let layer = layer();
    let store = store();
    let course = store
        .seed("courses", json!({ "title": "Rust", "teacher": 9 }))
        .await
        .unwrap();
    let module = store
        .seed("modules", json!({ "course": course.id, "title": "Ownership" }))
        .await
        .unwrap();
    let executor = TransactionExecutor::new(store.clone());

    layer
        .cache()
        .set(&CacheKeys::course_detail(course.id), &"outline", TtlClass::Static);
    layer
        .cache()
        .set(&CacheKeys::teacher_courses(9), &vec![course.id], TtlClass::Frequent);

    let batch = TransactionBatch::new()
        .with(Mutation::update("courses", course.id, json!({ "title": "Rust 2" })))
        .with(Mutation::delete("modules", module.id))
        .with(Mutation::create("modules", json!({ "course": course.id, "title": "Borrowing" })));
    let outcomes = executor.execute_batch(batch).await.unwrap();
    assert_eq!(outcomes.len(), 3);

    assert_eq!(layer.invalidator().on_course_update(course.id, Some(9)), 2);
    assert!(layer.cache().is_empty());

    let modules = store.rows("modules").await;
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].data["title"], "Borrowing");
}

struct PublishedCourses {
    store: InMemoryStore,
}

impl OffsetQuery for PublishedCourses {
    type Item = Record;

    async fn fetch(&self, window: PageWindow) -> Result<Vec<Record>> {
        Ok(self
            .store
            .rows("courses")
            .await
            .into_iter()
            .skip(window.offset as usize)
            .take(window.limit as usize)
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.store.count("courses").await as u64)
    }
}

/// Test 4: Cached catalogue pages are dropped when a course is created
#[tokio::test]
async fn test_paginated_catalogue_invalidation() {
    let layer = layer();
    let store = store();
    for i in 1..=45 {
        store
            .seed("courses", json!({ "title": format!("Course {}", i) }))
            .await
            .unwrap();
    }
    let query = PublishedCourses {
        store: store.clone(),
    };

    let page = |n| {
        layer.paginated_cached_query(
            "published_courses",
            |p| CacheKeys::published_courses(p.page, p.page_size),
            TtlClass::List,
            &query,
            PaginationParams::new(n, 20),
        )
    };

    let third = page(3).await.unwrap();
    assert_eq!(third.items.len(), 5);
    assert_eq!(third.meta.total_pages, 3);
    assert!(!third.meta.has_next);

    store.seed("courses", json!({ "title": "Course 46" })).await.unwrap();
    assert_eq!(page(3).await.unwrap().items.len(), 5);

    layer.invalidator().on_course_created(1);
    let refreshed = page(3).await.unwrap();
    assert_eq!(refreshed.items.len(), 6);
    assert_eq!(refreshed.meta.total_items, 46);
}

struct ActivityFeed {
    events: Vec<u64>,
}

impl CursorQuery for ActivityFeed {
    type Item = u64;
    type Cursor = u64;

    fn cursor_of(&self, item: &u64) -> u64 {
        *item
    }

    async fn fetch(&self, window: CursorWindow<u64>) -> Result<Vec<u64>> {
        let mut rows: Vec<u64> = match window.direction {
            CursorDirection::Forward => self
                .events
                .iter()
                .copied()
                .filter(|id| window.cursor.map_or(true, |c| *id > c))
                .collect(),
            CursorDirection::Backward => self
                .events
                .iter()
                .rev()
                .copied()
                .filter(|id| window.cursor.map_or(true, |c| *id < c))
                .collect(),
        };
        rows.truncate(window.fetch_limit as usize);
        Ok(rows)
    }
}

/// Test 5: Walking an activity feed to its end
#[tokio::test]
async fn test_cursor_feed_walk() {
    let layer = layer();
    let feed = ActivityFeed {
        events: (1..=45).collect(),
    };

    let mut cursor = None;
    let mut seen = Vec::new();
    loop {
        let page = layer
            .execute_cursor_query("activity_feed", &feed, CursorParams::forward(cursor, 20))
            .await
            .unwrap();
        seen.extend(page.items);
        if !page.meta.has_more {
            assert_eq!(page.meta.next_cursor, None);
            break;
        }
        cursor = page.meta.next_cursor;
    }

    assert_eq!(seen, (1..=45).collect::<Vec<_>>());
    assert_eq!(layer.profiler().stats_for("activity_feed").unwrap().count, 3);
}
