//! Local store trait definition.

use crate::error::StoreResult;
use crate::query::Query;
use crate::record::Record;
use async_trait::async_trait;

/// A local record store used by the sync engine.
///
/// A store is a set of named tables. Each table maps a record id to a
/// [`Record`]. Tables spring into existence on first write and reading an
/// unknown table yields nothing.
///
/// # Invariants
///
/// - `upsert` replaces the whole record stored under the same id
/// - Records written by `upsert` are returned by subsequent reads
/// - A failed call leaves no partial effect visible to readers
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::MemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent state
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Returns the record stored under `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn lookup(&self, table: &str, id: &str) -> StoreResult<Option<Record>>;

    /// Returns the records matching `query`.
    ///
    /// Without an ordering clause records come back in ascending id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn read(&self, query: &Query) -> StoreResult<Vec<Record>>;

    /// Counts the records matching the query's filters.
    ///
    /// Paging clauses are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn count(&self, query: &Query) -> StoreResult<u64>;

    /// Inserts or replaces records.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::MissingId`] if any record lacks an id, in
    /// which case nothing is written, or an I/O error.
    async fn upsert(&self, table: &str, records: &[Record]) -> StoreResult<()>;

    /// Deletes records by id. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the change cannot be persisted.
    async fn delete(&self, table: &str, ids: &[String]) -> StoreResult<()>;

    /// Deletes the records matching `query` and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the change cannot be persisted.
    async fn delete_query(&self, query: &Query) -> StoreResult<u64>;

    /// Lists the tables that currently hold at least one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn tables(&self) -> StoreResult<Vec<String>>;
}
