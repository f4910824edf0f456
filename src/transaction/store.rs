//! Store abstraction the transaction executor runs against.
//!
//! A [`TransactionalStore`] hands out one [`TransactionScope`] per atomic
//! execution. The scope owns one store session; writes issued through it are
//! applied by `commit` and discarded by `rollback`. Writes issued through any
//! other handle are not part of the scope.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;

pub type RecordId = u64;

/// One row: its id plus its column data as a JSON object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub data: Value,
}

/// Session-scoped handle for writes inside one atomic scope.
pub trait TransactionScope: Send {
    /// Insert a row, returning it with its assigned id.
    fn insert(&mut self, table: &str, data: Value) -> impl Future<Output = Result<Record>> + Send;

    /// Merge `data` into row `id`. `Ok(None)` when the row is absent.
    fn update(
        &mut self,
        table: &str,
        id: RecordId,
        data: Value,
    ) -> impl Future<Output = Result<Option<Record>>> + Send;

    /// Delete rows by id, returning how many existed.
    fn delete(&mut self, table: &str, ids: &[RecordId]) -> impl Future<Output = Result<u64>> + Send;

    /// Read a row as seen from inside the scope.
    fn get(
        &mut self,
        table: &str,
        id: RecordId,
    ) -> impl Future<Output = Result<Option<Record>>> + Send;
}

/// Store that can open atomic scopes.
pub trait TransactionalStore: Send + Sync {
    type Scope: TransactionScope;

    fn begin(&self) -> impl Future<Output = Result<Self::Scope>> + Send;

    fn commit(&self, scope: Self::Scope) -> impl Future<Output = Result<()>> + Send;

    fn rollback(&self, scope: Self::Scope) -> impl Future<Output = Result<()>> + Send;
}
