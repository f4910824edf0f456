//! In-memory [`TransactionalStore`] for tests and demos.
//!
//! Tables hold JSON-object rows keyed by auto-increment ids. A scope takes
//! the store's session lock for its whole lifetime and writes into a staged
//! copy of the tables; commit swaps the copy in, rollback drops it. Scopes
//! therefore run one at a time, and code inside a scope must not call the
//! store's own read helpers (they would wait on the lock the scope holds).

use super::store::{Record, RecordId, TransactionScope, TransactionalStore};
use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug, Default)]
struct Tables {
    rows: HashMap<String, BTreeMap<RecordId, Value>>,
    next_ids: HashMap<String, RecordId>,
}

type UniqueColumns = HashMap<String, Vec<Vec<String>>>;

impl Tables {
    fn check_unique(
        &self,
        unique: &UniqueColumns,
        table: &str,
        candidate: &Value,
        skip_id: Option<RecordId>,
    ) -> Result<()> {
        let (Some(constraints), Some(rows)) = (unique.get(table), self.rows.get(table)) else {
            return Ok(());
        };

        for columns in constraints {
            let key: Option<Vec<&Value>> = columns.iter().map(|c| candidate.get(c)).collect();
            let Some(key) = key else { continue };

            let clash = rows.iter().any(|(id, row)| {
                Some(*id) != skip_id
                    && columns
                        .iter()
                        .zip(&key)
                        .all(|(column, value)| row.get(column) == Some(*value))
            });
            if clash {
                return Err(Error::constraint(format!(
                    "duplicate {} for unique ({})",
                    table,
                    columns.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Shared in-memory store. Clones share the same tables.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
    unique: Arc<UniqueColumns>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a unique constraint over `columns` of `table`.
    pub fn with_unique(mut self, table: &str, columns: &[&str]) -> Self {
        Arc::make_mut(&mut self.unique)
            .entry(table.to_string())
            .or_default()
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Insert a row in its own committed scope.
    ///
    /// # Errors
    ///
    /// Same as [`TransactionScope::insert`].
    pub async fn seed(&self, table: &str, data: Value) -> Result<Record> {
        let mut scope = self.begin().await?;
        let record = scope.insert(table, data).await?;
        self.commit(scope).await?;
        Ok(record)
    }

    /// Committed row, if any.
    pub async fn get(&self, table: &str, id: RecordId) -> Option<Record> {
        let tables = self.tables.lock().await;
        tables
            .rows
            .get(table)
            .and_then(|rows| rows.get(&id))
            .map(|data| Record {
                id,
                data: data.clone(),
            })
    }

    /// Committed rows of `table`, ordered by id.
    pub async fn rows(&self, table: &str) -> Vec<Record> {
        let tables = self.tables.lock().await;
        tables
            .rows
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|(id, data)| Record {
                        id: *id,
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn count(&self, table: &str) -> usize {
        let tables = self.tables.lock().await;
        tables.rows.get(table).map_or(0, |rows| rows.len())
    }
}

/// Open scope on an [`InMemoryStore`].
pub struct MemoryScope {
    session: OwnedMutexGuard<Tables>,
    staged: Tables,
    unique: Arc<UniqueColumns>,
}

impl TransactionScope for MemoryScope {
    async fn insert(&mut self, table: &str, data: Value) -> Result<Record> {
        if !data.is_object() {
            return Err(Error::validation(format!(
                "row for {} must be a JSON object",
                table
            )));
        }
        self.staged.check_unique(&self.unique, table, &data, None)?;

        let next_id = self.staged.next_ids.entry(table.to_string()).or_insert(1);
        let id = *next_id;
        *next_id += 1;

        self.staged
            .rows
            .entry(table.to_string())
            .or_default()
            .insert(id, data.clone());
        Ok(Record { id, data })
    }

    async fn update(&mut self, table: &str, id: RecordId, data: Value) -> Result<Option<Record>> {
        let Some(current) = self.staged.rows.get(table).and_then(|rows| rows.get(&id)) else {
            return Ok(None);
        };

        let merged = match (current, data) {
            (Value::Object(existing), Value::Object(changes)) => {
                let mut fields = existing.clone();
                fields.extend(changes);
                Value::Object(fields)
            }
            (_, replacement) => replacement,
        };
        self.staged
            .check_unique(&self.unique, table, &merged, Some(id))?;

        if let Some(rows) = self.staged.rows.get_mut(table) {
            rows.insert(id, merged.clone());
        }
        Ok(Some(Record { id, data: merged }))
    }

    async fn delete(&mut self, table: &str, ids: &[RecordId]) -> Result<u64> {
        let Some(rows) = self.staged.rows.get_mut(table) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| rows.remove(*id).is_some()).count() as u64)
    }

    async fn get(&mut self, table: &str, id: RecordId) -> Result<Option<Record>> {
        Ok(self
            .staged
            .rows
            .get(table)
            .and_then(|rows| rows.get(&id))
            .map(|data| Record {
                id,
                data: data.clone(),
            }))
    }
}

impl TransactionalStore for InMemoryStore {
    type Scope = MemoryScope;

    async fn begin(&self) -> Result<MemoryScope> {
        let session = Arc::clone(&self.tables).lock_owned().await;
        let staged = Tables::clone(&session);
        Ok(MemoryScope {
            session,
            staged,
            unique: Arc::clone(&self.unique),
        })
    }

    async fn commit(&self, scope: MemoryScope) -> Result<()> {
        let MemoryScope {
            mut session,
            staged,
            ..
        } = scope;
        *session = staged;
        Ok(())
    }

    async fn rollback(&self, scope: MemoryScope) -> Result<()> {
        drop(scope);
        Ok(())
    }
}
