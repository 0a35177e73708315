//! In-memory local store for testing.

use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use crate::record::{item_id, Record};
use crate::store::LocalStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Table contents keyed by table name, then record id.
///
/// Shared by [`MemoryStore`] and [`crate::FileStore`]; the latter persists it
/// as its on-disk snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct TableSet {
    tables: BTreeMap<String, BTreeMap<String, Record>>,
}

impl TableSet {
    pub(crate) fn lookup(&self, table: &str, id: &str) -> Option<Record> {
        self.tables.get(table)?.get(id).cloned()
    }

    pub(crate) fn read(&self, query: &Query) -> Vec<Record> {
        match self.tables.get(&query.table) {
            Some(rows) => query.apply(rows.values()),
            None => Vec::new(),
        }
    }

    pub(crate) fn count(&self, query: &Query) -> u64 {
        self.tables.get(&query.table).map_or(0, |rows| {
            rows.values().filter(|r| query.matches(r)).count() as u64
        })
    }

    /// Pairs each record with its id, rejecting the batch if any id is missing.
    pub(crate) fn keyed(table: &str, records: &[Record]) -> StoreResult<Vec<(String, Record)>> {
        records
            .iter()
            .map(|record| {
                item_id(record)
                    .map(|id| (id, record.clone()))
                    .ok_or_else(|| StoreError::MissingId {
                        table: table.to_string(),
                    })
            })
            .collect()
    }

    pub(crate) fn upsert(&mut self, table: &str, keyed: Vec<(String, Record)>) {
        if keyed.is_empty() {
            return;
        }
        let rows = self.tables.entry(table.to_string()).or_default();
        rows.extend(keyed);
    }

    pub(crate) fn delete(&mut self, table: &str, ids: &[String]) -> u64 {
        let Some(rows) = self.tables.get_mut(table) else {
            return 0;
        };
        let removed = ids.iter().filter(|id| rows.remove(*id).is_some()).count() as u64;
        if rows.is_empty() {
            self.tables.remove(table);
        }
        removed
    }

    pub(crate) fn delete_query(&mut self, query: &Query) -> u64 {
        let mut query = query.clone();
        query.select.clear();
        let ids: Vec<String> = self.read(&query).iter().filter_map(item_id).collect();
        self.delete(&query.table, &ids)
    }

    pub(crate) fn tables(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}

/// An in-memory local store.
///
/// Suitable for unit tests, integration tests and caches that do not need
/// to survive a restart.
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across tasks.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<TableSet>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records in `table`.
    #[must_use]
    pub fn record_count(&self, table: &str) -> usize {
        self.tables.read().count(&Query::new(table)) as usize
    }

    /// Removes every table.
    pub fn clear(&self) {
        *self.tables.write() = TableSet::default();
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn lookup(&self, table: &str, id: &str) -> StoreResult<Option<Record>> {
        Ok(self.tables.read().lookup(table, id))
    }

    async fn read(&self, query: &Query) -> StoreResult<Vec<Record>> {
        Ok(self.tables.read().read(query))
    }

    async fn count(&self, query: &Query) -> StoreResult<u64> {
        Ok(self.tables.read().count(query))
    }

    async fn upsert(&self, table: &str, records: &[Record]) -> StoreResult<()> {
        let keyed = TableSet::keyed(table, records)?;
        self.tables.write().upsert(table, keyed);
        Ok(())
    }

    async fn delete(&self, table: &str, ids: &[String]) -> StoreResult<()> {
        self.tables.write().delete(table, ids);
        Ok(())
    }

    async fn delete_query(&self, query: &Query) -> StoreResult<u64> {
        Ok(self.tables.write().delete_query(query))
    }

    async fn tables(&self) -> StoreResult<Vec<String>> {
        Ok(self.tables.read().tables())
    }
}
