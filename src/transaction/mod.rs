//! Batched transaction executor.
//!
//! [`TransactionExecutor::with_transaction`] runs a callback inside one
//! atomic scope: the scope commits only when the callback returns `Ok`, and
//! an `Err` or a panic rolls back every write made through the scope. The
//! bulk helpers (`batch_create`, `batch_update`, `batch_delete`,
//! `execute_batch`) are loops of single-row writes inside one such scope.
//!
//! # Example
//!
//! ```
//! use datalayer_kit::transaction::{InMemoryStore, TransactionExecutor, TransactionScope};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> datalayer_kit::Result<()> {
//! let executor = TransactionExecutor::new(InMemoryStore::new());
//!
//! let course_id = executor
//!     .with_transaction(|tx| {
//!         Box::pin(async move {
//!             let course = tx.insert("courses", json!({ "title": "Rust" })).await?;
//!             tx.insert("modules", json!({ "course": course.id, "title": "Ownership" }))
//!                 .await?;
//!             Ok(course.id)
//!         })
//!     })
//!     .await?;
//!
//! assert_eq!(course_id, 1);
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod store;

pub use memory::{InMemoryStore, MemoryScope};
pub use store::{Record, RecordId, TransactionScope, TransactionalStore};

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOp {
    Create,
    Update,
    Delete,
}

/// One write inside a [`TransactionBatch`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub table: String,
    pub op: MutationOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Mutation {
    pub fn create(table: impl Into<String>, data: Value) -> Self {
        Mutation {
            table: table.into(),
            op: MutationOp::Create,
            id: None,
            data: Some(data),
        }
    }

    pub fn update(table: impl Into<String>, id: RecordId, data: Value) -> Self {
        Mutation {
            table: table.into(),
            op: MutationOp::Update,
            id: Some(id),
            data: Some(data),
        }
    }

    pub fn delete(table: impl Into<String>, id: RecordId) -> Self {
        Mutation {
            table: table.into(),
            op: MutationOp::Delete,
            id: Some(id),
            data: None,
        }
    }

    fn validate(&self, index: usize) -> Result<()> {
        let missing = match self.op {
            MutationOp::Create if self.data.is_none() => Some("data"),
            MutationOp::Update if self.id.is_none() => Some("id"),
            MutationOp::Update if self.data.is_none() => Some("data"),
            MutationOp::Delete if self.id.is_none() => Some("id"),
            _ => None,
        };

        match missing {
            Some(field) => Err(Error::validation(format!(
                "mutation {} ({:?} on {}) is missing {}",
                index, self.op, self.table, field
            ))),
            None => Ok(()),
        }
    }
}

/// Ordered mutations applied all-or-nothing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionBatch {
    mutations: Vec<Mutation>,
}

impl TransactionBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.mutations.iter()
    }
}

impl From<Vec<Mutation>> for TransactionBatch {
    fn from(mutations: Vec<Mutation>) -> Self {
        TransactionBatch { mutations }
    }
}

/// Result of one applied [`Mutation`].
#[derive(Clone, Debug, PartialEq)]
pub enum MutationOutcome {
    Created(Record),
    Updated(Record),
    Deleted(RecordId),
}

/// Runs atomic scopes against a [`TransactionalStore`].
///
/// Cloning is cheap; clones share the store.
pub struct TransactionExecutor<S> {
    store: Arc<S>,
}

impl<S> Clone for TransactionExecutor<S> {
    fn clone(&self) -> Self {
        TransactionExecutor {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: TransactionalStore> TransactionExecutor<S> {
    pub fn new(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    pub fn from_arc(store: Arc<S>) -> Self {
        TransactionExecutor { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `callback` inside one atomic scope.
    ///
    /// Every write must go through the scope handle passed to the callback.
    /// The scope commits when the callback returns `Ok`; otherwise it is
    /// rolled back and the callback's error is returned unchanged. A panic
    /// inside the callback is caught, rolled back, and reported as
    /// `ErrorKind::TransactionAborted`.
    ///
    /// # Errors
    ///
    /// - The error of `begin` or `commit`
    /// - The callback's error
    /// - `ErrorKind::TransactionAborted` if the callback panicked
    pub async fn with_transaction<T, F>(&self, callback: F) -> Result<T>
    where
        F: for<'s> FnOnce(&'s mut S::Scope) -> BoxFuture<'s, Result<T>>,
    {
        let mut scope = self.store.begin().await?;

        let scope_ref = &mut scope;
        let outcome = AssertUnwindSafe(async move { callback(scope_ref).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => {
                self.store.commit(scope).await.map_err(|e| {
                    error!("Transaction commit failed: {}", e);
                    e
                })?;
                debug!("Transaction committed");
                Ok(value)
            }
            Ok(Err(e)) => {
                self.rollback(scope, &e.to_string()).await;
                Err(e)
            }
            Err(panic) => {
                let reason = panic_message(&*panic);
                self.rollback(scope, &reason).await;
                Err(Error::aborted(format!(
                    "transaction callback panicked: {}",
                    reason
                )))
            }
        }
    }

    async fn rollback(&self, scope: S::Scope, reason: &str) {
        warn!("Rolling back transaction: {}", reason);
        if let Err(e) = self.store.rollback(scope).await {
            error!("Transaction rollback failed: {}", e);
        }
    }

    /// Insert every item into `table`, all or nothing.
    ///
    /// # Errors
    ///
    /// - `ErrorKind::Validation` if `items` is empty (no scope is opened)
    /// - `ErrorKind::TransactionAborted` naming the first failing item
    pub async fn batch_create(&self, table: &str, items: Vec<Value>) -> Result<Vec<Record>> {
        if items.is_empty() {
            return Err(Error::validation(format!(
                "batch_create on {} requires at least one item",
                table
            )));
        }

        let owned_table = table.to_string();
        let records = self
            .with_transaction(move |scope| {
                Box::pin(async move {
                    let mut created = Vec::with_capacity(items.len());
                    for (index, data) in items.into_iter().enumerate() {
                        let record = scope
                            .insert(&owned_table, data)
                            .await
                            .map_err(|e| member_failed("batch_create", &owned_table, index, e))?;
                        created.push(record);
                    }
                    Ok(created)
                })
            })
            .await?;

        info!("batch_create on {}: {} rows", table, records.len());
        Ok(records)
    }

    /// Apply each `(id, changes)` pair sequentially, all or nothing.
    ///
    /// # Errors
    ///
    /// - `ErrorKind::Validation` if `updates` is empty
    /// - `ErrorKind::TransactionAborted` if any target row is absent or any
    ///   update fails; earlier updates in the batch are rolled back
    pub async fn batch_update(
        &self,
        table: &str,
        updates: Vec<(RecordId, Value)>,
    ) -> Result<Vec<Record>> {
        if updates.is_empty() {
            return Err(Error::validation(format!(
                "batch_update on {} requires at least one item",
                table
            )));
        }

        let owned_table = table.to_string();
        let records = self
            .with_transaction(move |scope| {
                Box::pin(async move {
                    let mut updated = Vec::with_capacity(updates.len());
                    for (index, (id, changes)) in updates.into_iter().enumerate() {
                        match scope.update(&owned_table, id, changes).await {
                            Ok(Some(record)) => updated.push(record),
                            Ok(None) => {
                                let cause =
                                    Error::not_found(format!("{} {} not found", owned_table, id));
                                return Err(member_failed(
                                    "batch_update",
                                    &owned_table,
                                    index,
                                    cause,
                                ));
                            }
                            Err(e) => {
                                return Err(member_failed("batch_update", &owned_table, index, e))
                            }
                        }
                    }
                    Ok(updated)
                })
            })
            .await?;

        info!("batch_update on {}: {} rows", table, records.len());
        Ok(records)
    }

    /// Delete every id, failing the whole batch unless each row existed.
    ///
    /// # Errors
    ///
    /// - `ErrorKind::Validation` if `ids` is empty or contains duplicates
    /// - `ErrorKind::TransactionAborted` if fewer rows were deleted than
    ///   requested, or the delete itself failed
    pub async fn batch_delete(&self, table: &str, ids: Vec<RecordId>) -> Result<u64> {
        if ids.is_empty() {
            return Err(Error::validation(format!(
                "batch_delete on {} requires at least one id",
                table
            )));
        }
        let distinct: HashSet<&RecordId> = ids.iter().collect();
        if distinct.len() != ids.len() {
            return Err(Error::validation(format!(
                "batch_delete on {} received duplicate ids",
                table
            )));
        }

        let owned_table = table.to_string();
        let deleted = self
            .with_transaction(move |scope| {
                Box::pin(async move {
                    let affected = scope
                        .delete(&owned_table, &ids)
                        .await
                        .map_err(|e| member_failed("batch_delete", &owned_table, 0, e))?;

                    let expected = ids.len() as u64;
                    if affected != expected {
                        return Err(Error::aborted(format!(
                            "batch_delete on {}: expected {} rows, deleted {}",
                            owned_table, expected, affected
                        ))
                        .with_details(json!({
                            "operation": "batch_delete",
                            "table": owned_table,
                            "expected": expected,
                            "affected": affected,
                        })));
                    }
                    Ok(affected)
                })
            })
            .await?;

        info!("batch_delete on {}: {} rows", table, deleted);
        Ok(deleted)
    }

    /// Apply an ordered [`TransactionBatch`], all or nothing.
    ///
    /// Every mutation is checked for its required fields before the scope
    /// opens. An update or delete of an absent row fails the batch.
    ///
    /// # Errors
    ///
    /// - `ErrorKind::Validation` for an empty batch or malformed mutation
    /// - `ErrorKind::TransactionAborted` naming the first failing mutation
    pub async fn execute_batch(&self, batch: TransactionBatch) -> Result<Vec<MutationOutcome>> {
        if batch.is_empty() {
            return Err(Error::validation("transaction batch is empty"));
        }
        for (index, mutation) in batch.iter().enumerate() {
            mutation.validate(index)?;
        }

        let size = batch.len();
        let outcomes = self
            .with_transaction(move |scope| {
                Box::pin(async move {
                    let mut outcomes = Vec::with_capacity(batch.len());
                    for (index, mutation) in batch.mutations.into_iter().enumerate() {
                        let outcome = apply_mutation(scope, mutation)
                            .await
                            .map_err(|(table, e)| member_failed("execute_batch", &table, index, e))?;
                        outcomes.push(outcome);
                    }
                    Ok(outcomes)
                })
            })
            .await?;

        info!("Transaction batch of {} mutations committed", size);
        Ok(outcomes)
    }
}

/// Apply one validated mutation; on failure returns the table with the cause.
async fn apply_mutation<Sc: TransactionScope>(
    scope: &mut Sc,
    mutation: Mutation,
) -> std::result::Result<MutationOutcome, (String, Error)> {
    let Mutation {
        table,
        op,
        id,
        data,
    } = mutation;

    let result = match (op, id, data) {
        (MutationOp::Create, _, Some(data)) => {
            scope.insert(&table, data).await.map(MutationOutcome::Created)
        }
        (MutationOp::Update, Some(id), Some(data)) => match scope.update(&table, id, data).await {
            Ok(Some(record)) => Ok(MutationOutcome::Updated(record)),
            Ok(None) => Err(Error::not_found(format!("{} {} not found", table, id))),
            Err(e) => Err(e),
        },
        (MutationOp::Delete, Some(id), _) => match scope.delete(&table, &[id]).await {
            Ok(1) => Ok(MutationOutcome::Deleted(id)),
            Ok(_) => Err(Error::not_found(format!("{} {} not found", table, id))),
            Err(e) => Err(e),
        },
        (op, _, _) => Err(Error::validation(format!(
            "{:?} mutation on {} is incomplete",
            op, table
        ))),
    };

    result.map_err(|e| (table, e))
}

fn member_failed(operation: &str, table: &str, index: usize, cause: Error) -> Error {
    Error::aborted(format!(
        "{} on {} failed at item {}: {}",
        operation, table, index, cause
    ))
    .with_details(json!({
        "operation": operation,
        "table": table,
        "index": index,
        "cause": cause.kind().as_str(),
        "message": cause.message(),
    }))
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    async fn store_with_courses(n: u64) -> InMemoryStore {
        let store = InMemoryStore::new();
        for i in 1..=n {
            store
                .seed("courses", json!({ "title": format!("Course {}", i) }))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_with_transaction_commits_on_ok() {
        let executor = TransactionExecutor::new(InMemoryStore::new());
        let id = executor
            .with_transaction(|tx| {
                Box::pin(async move {
                    let record = tx.insert("courses", json!({ "title": "Rust" })).await?;
                    Ok(record.id)
                })
            })
            .await
            .unwrap();

        assert_eq!(executor.store().get("courses", id).await.unwrap().data["title"], "Rust");
    }

    #[tokio::test]
    async fn test_with_transaction_rolls_back_on_err() {
        let executor = TransactionExecutor::new(InMemoryStore::new());
        let result: Result<()> = executor
            .with_transaction(|tx| {
                Box::pin(async move {
                    tx.insert("courses", json!({ "title": "Rust" })).await?;
                    Err(Error::constraint("duplicate enrollment"))
                })
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::ConstraintViolation);
        assert_eq!(executor.store().count("courses").await, 0);
    }

    #[tokio::test]
    async fn test_with_transaction_rolls_back_on_panic() {
        let executor = TransactionExecutor::new(InMemoryStore::new());
        let result: Result<()> = executor
            .with_transaction(|tx| {
                Box::pin(async move {
                    tx.insert("courses", json!({ "title": "Rust" })).await?;
                    panic!("invariant broken");
                })
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionAborted);
        assert!(err.message().contains("invariant broken"));
        assert_eq!(executor.store().count("courses").await, 0);
    }

    #[tokio::test]
    async fn test_batch_update_is_atomic() {
        let store = store_with_courses(3).await;
        let executor = TransactionExecutor::new(store);

        let err = executor
            .batch_update(
                "courses",
                vec![
                    (1, json!({ "title": "A" })),
                    (42, json!({ "title": "B" })),
                    (3, json!({ "title": "C" })),
                ],
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransactionAborted);
        let details = err.details().unwrap();
        assert_eq!(details["index"], 1);
        assert_eq!(details["cause"], "NotFoundError");

        for (id, title) in [(1, "Course 1"), (2, "Course 2"), (3, "Course 3")] {
            let row = executor.store().get("courses", id).await.unwrap();
            assert_eq!(row.data["title"], title);
        }
    }

    #[tokio::test]
    async fn test_batch_create() {
        let executor = TransactionExecutor::new(InMemoryStore::new());
        let records = executor
            .batch_create(
                "enrollments",
                vec![json!({ "student": 1 }), json!({ "student": 2 })],
            )
            .await
            .unwrap();

        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(executor.store().count("enrollments").await, 2);
    }

    #[tokio::test]
    async fn test_batch_create_constraint_rolls_back() {
        let store = InMemoryStore::new().with_unique("enrollments", &["student", "course"]);
        let executor = TransactionExecutor::new(store);

        let err = executor
            .batch_create(
                "enrollments",
                vec![
                    json!({ "student": 1, "course": 5 }),
                    json!({ "student": 2, "course": 5 }),
                    json!({ "student": 1, "course": 5 }),
                ],
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransactionAborted);
        assert_eq!(err.details().unwrap()["cause"], "ConstraintViolation");
        assert_eq!(executor.store().count("enrollments").await, 0);
    }

    #[tokio::test]
    async fn test_empty_batches_rejected_before_scope() {
        let executor = TransactionExecutor::new(InMemoryStore::new());

        let create = executor.batch_create("courses", vec![]).await.unwrap_err();
        let update = executor.batch_update("courses", vec![]).await.unwrap_err();
        let delete = executor.batch_delete("courses", vec![]).await.unwrap_err();
        let batch = executor
            .execute_batch(TransactionBatch::new())
            .await
            .unwrap_err();

        for err in [create, update, delete, batch] {
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }

    #[tokio::test]
    async fn test_batch_delete_detects_missing_rows() {
        let store = store_with_courses(2).await;
        let executor = TransactionExecutor::new(store);

        let err = executor
            .batch_delete("courses", vec![1, 2, 3])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionAborted);
        assert_eq!(err.details().unwrap()["affected"], 2);
        assert_eq!(executor.store().count("courses").await, 2);

        assert_eq!(executor.batch_delete("courses", vec![1, 2]).await.unwrap(), 2);
        assert_eq!(executor.store().count("courses").await, 0);
    }

    #[tokio::test]
    async fn test_batch_delete_rejects_duplicates() {
        let executor = TransactionExecutor::new(store_with_courses(1).await);
        let err = executor.batch_delete("courses", vec![1, 1]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(executor.store().count("courses").await, 1);
    }

    #[tokio::test]
    async fn test_execute_batch_mixed() {
        let executor = TransactionExecutor::new(store_with_courses(2).await);
        let batch = TransactionBatch::new()
            .with(Mutation::create("courses", json!({ "title": "New" })))
            .with(Mutation::update("courses", 1, json!({ "title": "Renamed" })))
            .with(Mutation::delete("courses", 2));

        let outcomes = executor.execute_batch(batch).await.unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], MutationOutcome::Created(ref r) if r.id == 3));
        assert_eq!(outcomes[2], MutationOutcome::Deleted(2));

        let rows = executor.store().rows("courses").await;
        let titles: Vec<&str> = rows.iter().filter_map(|r| r.data["title"].as_str()).collect();
        assert_eq!(titles, vec!["Renamed", "New"]);
    }

    #[tokio::test]
    async fn test_execute_batch_rejects_malformed_mutation() {
        let executor = TransactionExecutor::new(InMemoryStore::new());
        let batch = TransactionBatch::from(vec![Mutation {
            table: "courses".to_string(),
            op: MutationOp::Update,
            id: None,
            data: Some(json!({})),
        }]);

        let err = executor.execute_batch(batch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_execute_batch_delete_of_absent_row_rolls_back() {
        let executor = TransactionExecutor::new(store_with_courses(1).await);
        let batch = TransactionBatch::new()
            .with(Mutation::update("courses", 1, json!({ "title": "Changed" })))
            .with(Mutation::delete("courses", 9));

        let err = executor.execute_batch(batch).await.unwrap_err();
        assert_eq!(err.details().unwrap()["index"], 1);
        assert_eq!(
            executor.store().get("courses", 1).await.unwrap().data["title"],
            "Course 1"
        );
    }
}
