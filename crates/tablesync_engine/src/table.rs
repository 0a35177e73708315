//! Table-scoped handle over a [`SyncContext`].

use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::pull::PullResult;
use crate::transport::Transport;
use tablesync_store::{LocalStore, Query, Record};

/// A [`SyncContext`] bound to one table name.
///
/// Queries passed to a handle are retargeted at its table.
pub struct SyncTable<'a, T: Transport, S: LocalStore> {
    context: &'a SyncContext<T, S>,
    name: String,
}

impl<'a, T: Transport, S: LocalStore> SyncTable<'a, T, S> {
    pub(crate) fn new(context: &'a SyncContext<T, S>, name: String) -> Self {
        Self { context, name }
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A query over the whole table, ready for builder calls.
    pub fn query(&self) -> Query {
        Query::new(self.name.clone())
    }

    /// See [`SyncContext::insert`].
    pub async fn insert(&self, item: Record) -> SyncResult<Record> {
        self.context.insert(&self.name, item).await
    }

    /// See [`SyncContext::update`].
    pub async fn update(&self, item: Record) -> SyncResult<()> {
        self.context.update(&self.name, item).await
    }

    /// See [`SyncContext::delete`].
    pub async fn delete(&self, item_id: &str) -> SyncResult<()> {
        self.context.delete(&self.name, item_id).await
    }

    /// See [`SyncContext::lookup`].
    pub async fn lookup(&self, item_id: &str) -> SyncResult<Option<Record>> {
        self.context.lookup(&self.name, item_id).await
    }

    /// Reads local records. `None` reads the whole table.
    pub async fn read(&self, query: Option<Query>) -> SyncResult<Vec<Record>> {
        self.context.read(&self.scoped(query)).await
    }

    /// Pulls remote records into this table. `None` pulls the whole table.
    pub async fn pull(&self, query: Option<Query>) -> SyncResult<PullResult> {
        self.context.pull(&self.scoped(query)).await
    }

    /// See [`SyncContext::pull_incremental`].
    pub async fn pull_incremental(&self, query_id: &str, query: Option<Query>) -> SyncResult<PullResult> {
        self.context.pull_incremental(query_id, &self.scoped(query)).await
    }

    /// See [`SyncContext::purge`].
    pub async fn purge(&self, query: Option<Query>, query_id: Option<&str>) -> SyncResult<u64> {
        self.context.purge(&self.scoped(query), query_id).await
    }

    /// See [`SyncContext::force_purge`].
    pub async fn force_purge(&self, query: Option<Query>, query_id: Option<&str>) -> SyncResult<u64> {
        self.context.force_purge(&self.scoped(query), query_id).await
    }

    /// Pushes only this table's pending operations.
    pub async fn push(&self) -> SyncResult<tablesync_protocol::PushCompletionResult> {
        self.context.push_tables(&[self.name.as_str()]).await
    }

    /// Number of pending operations on this table.
    pub async fn pending_count(&self) -> usize {
        self.context.pending_count(Some(&self.name)).await
    }

    fn scoped(&self, query: Option<Query>) -> Query {
        match query {
            Some(mut query) => {
                query.table = self.name.clone();
                query
            }
            None => self.query(),
        }
    }
}
