//! The sync context: local mutations, push, pull and purge.

use crate::config::{PushScope, SyncConfig};
use crate::error::{RemoteError, RemoteResult, SyncError, SyncResult};
use crate::handler::{OperationErrorAction, OperationExecutor, PassthroughHandler, SyncHandler};
use crate::pull::{self, PullResult, PullStrategy};
use crate::queue_store::QueueStore;
use crate::remote::RemoteClient;
use crate::state::{SyncState, SyncStats};
use crate::table::SyncTable;
use crate::transport::Transport;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tablesync_protocol::system;
use tablesync_protocol::{
    EnqueueOutcome, ItemKey, OperationQueue, PushCompletionResult, PushStatus, TableOperation,
    TableOperationError, TableOperationKind,
};
use tablesync_store::{item_id, LocalStore, Query, Record, ID_FIELD};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, Notify, RwLock as AsyncRwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Queue plus the key of the item a push is currently sending.
struct QueueState {
    queue: OperationQueue,
    in_flight: Option<ItemKey>,
}

/// Offline sync context over one local store and one remote service.
///
/// Mutations go to the local store immediately and are queued for the
/// remote service. [`push`](Self::push) replays the queue in order,
/// [`pull`](Self::pull) refreshes a local table from a remote query after
/// flushing pending work, and [`purge`](Self::purge) drops local rows
/// without contacting the service.
///
/// # Concurrency
///
/// - Pushes are serialized.
/// - A mutation on the item a push is sending waits until that item's
///   remote call has finished.
/// - Pull and purge hold their table exclusively against mutations on it.
pub struct SyncContext<T: Transport, S: LocalStore> {
    config: SyncConfig,
    remote: RemoteClient<T>,
    store: Arc<S>,
    persisted: QueueStore<S>,
    handler: Arc<dyn SyncHandler>,
    queue: AsyncMutex<QueueState>,
    item_released: Notify,
    push_lock: AsyncMutex<()>,
    table_locks: Mutex<HashMap<String, Arc<AsyncRwLock<()>>>>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl<T: Transport, S: LocalStore> SyncContext<T, S> {
    /// Creates a context with the [`PassthroughHandler`], loading any queue
    /// persisted in `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted queue cannot be read.
    pub async fn new(config: SyncConfig, transport: T, store: S) -> SyncResult<Self> {
        Self::with_handler(config, transport, store, Arc::new(PassthroughHandler)).await
    }

    /// Creates a context with a custom handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted queue cannot be read.
    pub async fn with_handler(
        config: SyncConfig,
        transport: T,
        store: S,
        handler: Arc<dyn SyncHandler>,
    ) -> SyncResult<Self> {
        let store = Arc::new(store);
        let persisted = QueueStore::new(Arc::clone(&store));
        let queue = persisted.load_queue().await?;
        info!(pending = queue.len(), "sync context initialized");

        Ok(Self {
            remote: RemoteClient::new(Arc::new(transport), &config),
            config,
            store,
            persisted,
            handler,
            queue: AsyncMutex::new(QueueState {
                queue,
                in_flight: None,
            }),
            item_released: Notify::new(),
            push_lock: AsyncMutex::new(()),
            table_locks: Mutex::new(HashMap::new()),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the local store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        self.remote.transport()
    }

    /// Returns a handle bound to one table.
    pub fn table(&self, name: impl Into<String>) -> SyncTable<'_, T, S> {
        SyncTable::new(self, name.into())
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    // ------------------------------------------------------------------
    // Local mutations
    // ------------------------------------------------------------------

    /// Inserts an item locally and queues it for the remote service.
    ///
    /// An item without an id gets a random UUID. Returns the item as
    /// stored.
    ///
    /// # Errors
    ///
    /// - [`SyncError::QueueConflict`] if the queued operation for the item
    ///   does not accept an insert
    /// - [`SyncError::ItemAlreadyExists`] if the id is already in the table
    /// - [`SyncError::InvalidItem`] if the id is unusable
    pub async fn insert(&self, table: &str, mut item: Record) -> SyncResult<Record> {
        check_mutable_table(table)?;
        let id = match item.get(ID_FIELD) {
            None | Some(Value::Null) => {
                let id = Uuid::new_v4().to_string();
                item.insert(ID_FIELD.into(), Value::String(id.clone()));
                id
            }
            Some(_) => item_id(&item).ok_or_else(|| {
                SyncError::InvalidItem("id must be a non-empty string or a number".into())
            })?,
        };

        let operation = TableOperation::new(TableOperationKind::Insert, table, id, Some(item.clone()));
        self.enqueue(operation).await?;
        Ok(item)
    }

    /// Replaces an item locally and queues the update.
    ///
    /// # Errors
    ///
    /// Fails if the item has no id or the queued operation for the item
    /// does not accept an update.
    pub async fn update(&self, table: &str, item: Record) -> SyncResult<()> {
        check_mutable_table(table)?;
        let id = item_id(&item).ok_or_else(|| SyncError::InvalidItem("update requires an id".into()))?;
        let operation = TableOperation::new(TableOperationKind::Update, table, id, Some(item));
        self.enqueue(operation).await?;
        Ok(())
    }

    /// Deletes an item locally and queues the delete.
    ///
    /// # Errors
    ///
    /// Fails if the queued operation for the item does not accept a delete.
    pub async fn delete(&self, table: &str, item_id: &str) -> SyncResult<()> {
        check_mutable_table(table)?;
        if item_id.is_empty() {
            return Err(SyncError::InvalidItem("delete requires an id".into()));
        }
        let operation = TableOperation::new(TableOperationKind::Delete, table, item_id, None);
        self.enqueue(operation).await?;
        Ok(())
    }

    /// Reads one item from the local table.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn lookup(&self, table: &str, item_id: &str) -> SyncResult<Option<Record>> {
        Ok(self.store.lookup(table, item_id).await?)
    }

    /// Runs a query against the local table.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn read(&self, query: &Query) -> SyncResult<Vec<Record>> {
        Ok(self.store.read(query).await?)
    }

    /// Counts queued operations, for one table or all tables.
    pub async fn pending_count(&self, table: Option<&str>) -> usize {
        self.queue.lock().await.queue.pending_count(table)
    }

    /// Returns a copy of the queue in replay order.
    pub async fn pending_operations(&self) -> Vec<TableOperation> {
        self.queue.lock().await.queue.iter().cloned().collect()
    }

    async fn enqueue(&self, operation: TableOperation) -> SyncResult<EnqueueOutcome> {
        let key = operation.key();
        let incoming = operation.kind;
        let snapshot = operation.item.clone();

        let table_lock = self.table_lock(&key.table);
        let _table = table_lock.read().await;
        let mut state = self.lock_item(&key).await;

        let previous = state.queue.get_by_key(&key).cloned();
        let existing = previous.as_ref().map(|op| op.kind);
        let outcome = state
            .queue
            .prepare(operation)
            .map_err(|source| SyncError::QueueConflict {
                table: key.table.clone(),
                item_id: key.item_id.clone(),
                existing: existing.unwrap_or(incoming),
                incoming,
                source,
            })?;

        if existing.is_none()
            && incoming == TableOperationKind::Insert
            && self.store.lookup(&key.table, &key.item_id).await?.is_some()
        {
            return Err(SyncError::ItemAlreadyExists {
                table: key.table,
                item_id: key.item_id,
            });
        }

        // The queue row goes first so a local write never exists without it.
        match &outcome {
            EnqueueOutcome::Appended(op) | EnqueueOutcome::Collapsed(op) => {
                self.persisted.save_operation(op).await?
            }
            EnqueueOutcome::Cancelled(op) => {
                self.persisted.delete_operations(&[op.id.clone()]).await?
            }
        }

        let local = match (incoming, snapshot) {
            (TableOperationKind::Delete, _) => {
                self.store.delete(&key.table, &[key.item_id.clone()]).await
            }
            (_, Some(item)) => self.store.upsert(&key.table, &[item]).await,
            (_, None) => Ok(()),
        };
        if let Err(error) = local {
            self.restore_operation(&outcome, previous.as_ref()).await;
            return Err(error.into());
        }

        state.queue.apply(&outcome);
        if !matches!(outcome, EnqueueOutcome::Appended(_)) {
            self.persisted
                .delete_errors(&[outcome.operation().id.clone()])
                .await?;
        }

        let op = outcome.operation();
        debug!(
            table = %key.table,
            item_id = %key.item_id,
            kind = %incoming,
            queued = %op.kind,
            sequence = op.sequence,
            cancelled = matches!(outcome, EnqueueOutcome::Cancelled(_)),
            "operation queued"
        );
        Ok(outcome)
    }

    /// Puts the persisted queue row back the way it was before `outcome`.
    async fn restore_operation(&self, outcome: &EnqueueOutcome, previous: Option<&TableOperation>) {
        let restored = match previous {
            Some(op) => self.persisted.save_operation(op).await,
            None => {
                self.persisted
                    .delete_operations(&[outcome.operation().id.clone()])
                    .await
            }
        };
        if let Err(error) = restored {
            warn!(
                table = %outcome.operation().table_name,
                item_id = %outcome.operation().item_id,
                error = %error,
                "failed to roll back queued operation"
            );
        }
    }

    // ------------------------------------------------------------------
    // Push
    // ------------------------------------------------------------------

    /// Pushes every pending operation in queue order.
    ///
    /// Operations queued after the push starts wait for the next push.
    ///
    /// # Errors
    ///
    /// - [`SyncError::PushAborted`] if the transport, authentication or the
    ///   local store failed; the failing operation and those after it stay
    ///   queued
    /// - [`SyncError::PushCompletedWithErrors`] if every operation was
    ///   attempted but some were refused
    pub async fn push(&self) -> SyncResult<PushCompletionResult> {
        self.push_scoped(None).await
    }

    /// Pushes the pending operations of some tables in queue order.
    ///
    /// # Errors
    ///
    /// See [`push`](Self::push).
    pub async fn push_tables(&self, tables: &[&str]) -> SyncResult<PushCompletionResult> {
        let tables = tables.iter().map(|t| t.to_string()).collect();
        self.push_scoped(Some(tables)).await
    }

    async fn push_scoped(&self, tables: Option<Vec<String>>) -> SyncResult<PushCompletionResult> {
        let _push = self.push_lock.lock().await;
        self.set_state(SyncState::Pushing);

        let bookmark = self.queue.lock().await.queue.bookmark();
        let mut result = PushCompletionResult::new();
        let mut cursor = None;
        let mut abort = None;

        loop {
            let next = {
                let mut state = self.queue.lock().await;
                let next = state
                    .queue
                    .next_after(cursor, bookmark, tables.as_deref())
                    .cloned();
                if let Some(op) = &next {
                    state.in_flight = Some(op.key());
                }
                next
            };
            let Some(operation) = next else {
                break;
            };
            cursor = Some(operation.sequence);

            let outcome = self.push_operation(&operation, &mut result).await;
            self.release_item().await;

            if let Err((status, error)) = outcome {
                result.status = status;
                abort = Some(error);
                break;
            }
        }

        self.handler.on_push_complete(&result).await;
        {
            let mut stats = self.stats.write();
            stats.pushes += 1;
            stats.operations_pushed += result.pushed as u64;
            stats.operation_errors += result.operation_errors.len() as u64;
            stats.last_push_at = Some(Utc::now());
        }

        let outcome = match abort {
            Some(source) => {
                warn!(status = ?result.status, pushed = result.pushed, error = %source, "push aborted");
                Err(SyncError::PushAborted {
                    result: Box::new(result),
                    source: Box::new(source),
                })
            }
            None if !result.operation_errors.is_empty() => {
                warn!(
                    pushed = result.pushed,
                    errors = result.operation_errors.len(),
                    "push completed with operation errors"
                );
                Err(SyncError::PushCompletedWithErrors(Box::new(result)))
            }
            None => {
                info!(pushed = result.pushed, "push complete");
                Ok(result)
            }
        };
        self.finish(&outcome);
        outcome
    }

    /// Sends one operation and records its outcome. `Err` stops the cycle.
    async fn push_operation(
        &self,
        operation: &TableOperation,
        result: &mut PushCompletionResult,
    ) -> Result<(), (PushStatus, SyncError)> {
        let executor = RemoteExecutor {
            remote: &self.remote,
            operation,
        };

        match self.handler.execute_table_operation(&executor).await {
            Ok(server_item) => {
                self.complete_operation(operation, server_item)
                    .await
                    .map_err(|e| (PushStatus::CancelledByLocalStoreError, e))?;
                debug!(
                    table = %operation.table_name,
                    item_id = %operation.item_id,
                    kind = %operation.kind,
                    sequence = operation.sequence,
                    "operation pushed"
                );
                result.pushed += 1;
                Ok(())
            }
            Err(error) if error.is_transport() => {
                Err((PushStatus::CancelledByNetworkError, SyncError::Remote(error)))
            }
            Err(error) if error.is_authentication() => Err((
                PushStatus::CancelledByAuthenticationError,
                SyncError::Remote(error),
            )),
            Err(error) => {
                let op_error = operation_error(operation, &error);
                warn!(
                    table = %operation.table_name,
                    item_id = %operation.item_id,
                    kind = %operation.kind,
                    status = ?op_error.status,
                    "operation refused: {}", op_error.message
                );
                self.record_error(operation, &op_error)
                    .await
                    .map_err(|e| (PushStatus::CancelledByLocalStoreError, e))?;
                result.operation_errors.push(op_error);
                Ok(())
            }
        }
    }

    async fn complete_operation(
        &self,
        operation: &TableOperation,
        server_item: Option<Record>,
    ) -> SyncResult<()> {
        if operation.kind != TableOperationKind::Delete {
            if let Some(item) = server_item.filter(|item| item_id(item).is_some()) {
                self.store.upsert(&operation.table_name, &[item]).await?;
            }
        }
        self.persisted.delete_operations(&[operation.id.clone()]).await?;
        self.persisted.delete_errors(&[operation.id.clone()]).await?;
        self.queue.lock().await.queue.remove(operation);
        Ok(())
    }

    async fn record_error(
        &self,
        operation: &TableOperation,
        error: &TableOperationError,
    ) -> SyncResult<()> {
        self.persisted.save_error(error).await?;
        if self.handler.on_operation_error(error) == OperationErrorAction::Discard {
            debug!(table = %operation.table_name, item_id = %operation.item_id, "discarding refused operation");
            self.persisted.delete_operations(&[operation.id.clone()]).await?;
            self.persisted.delete_errors(&[operation.id.clone()]).await?;
            self.queue.lock().await.queue.remove(operation);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pull and purge
    // ------------------------------------------------------------------

    /// Pulls the records matching `query` into its local table.
    ///
    /// Pending operations are pushed first, all of them or only the
    /// table's depending on [`SyncConfig::pull_push_scope`]. Records are
    /// upserted, records the service reports deleted are removed, and
    /// local records absent from the result are left alone.
    ///
    /// # Errors
    ///
    /// - [`SyncError::PullFailedDueToPush`] if the preceding push failed;
    ///   nothing is queried in that case
    /// - [`SyncError::InvalidQuery`] for queries with a select clause
    /// - [`SyncError::Remote`] if the query itself failed
    pub async fn pull(&self, query: &Query) -> SyncResult<PullResult> {
        self.pull_with(query, None).await
    }

    /// Pulls only records changed since the last pull with the same
    /// `query_id`.
    ///
    /// # Errors
    ///
    /// As [`pull`](Self::pull), plus [`SyncError::InvalidQueryId`] and
    /// [`SyncError::InvalidQuery`] for queries with ordering or paging.
    pub async fn pull_incremental(&self, query_id: &str, query: &Query) -> SyncResult<PullResult> {
        self.pull_with(query, Some(query_id)).await
    }

    async fn pull_with(&self, query: &Query, query_id: Option<&str>) -> SyncResult<PullResult> {
        check_queryable_table(&query.table)?;
        pull::validate(query, query_id)?;

        let table = query.table.as_str();
        let scope = match self.config.pull_push_scope {
            PushScope::All => None,
            PushScope::Table => Some(table),
        };
        let mut result = PullResult::default();

        let table_lock = self.table_lock(table);
        let _guard = loop {
            let guard = table_lock.write().await;
            let pending = self.queue.lock().await.queue.pending_count(scope);
            if pending == 0 {
                break guard;
            }
            drop(guard);

            debug!(table, pending, "pushing pending operations before pull");
            result.pushed_before = true;
            let pushed = match scope {
                None => self.push().await,
                Some(table) => self.push_tables(&[table]).await,
            };
            if let Err(e) = pushed {
                let e = SyncError::PullFailedDueToPush(Box::new(e));
                self.fail(&e);
                return Err(e);
            }
        };

        self.set_state(SyncState::Pulling);
        let outcome = self.run_pull(query, query_id, &mut result).await;
        self.finish(&outcome);
        outcome?;

        {
            let mut stats = self.stats.write();
            stats.pulls += 1;
            stats.records_pulled += result.upserted as u64;
            stats.records_deleted += result.deleted as u64;
        }
        info!(
            table,
            upserted = result.upserted,
            deleted = result.deleted,
            pages = result.pages,
            "pull complete"
        );
        Ok(result)
    }

    async fn run_pull(
        &self,
        query: &Query,
        query_id: Option<&str>,
        result: &mut PullResult,
    ) -> SyncResult<()> {
        let table = query.table.as_str();
        let page_size = self.config.pull_page_size;
        let (mut strategy, mut saved_token) = match query_id {
            Some(query_id) => {
                let token = self.persisted.load_delta_token(table, query_id).await?;
                (
                    PullStrategy::incremental(query, page_size, query_id, token),
                    token,
                )
            }
            None => (PullStrategy::plain(query, page_size), None),
        };

        while let Some(page_query) = strategy.next_query() {
            let page = self.remote.query(&page_query).await?;
            result.pages += 1;

            let received = page.records.len() as u64;
            for record in &page.records {
                strategy.observe(record);
            }
            let (upserts, deleted) = pull::partition(page.records);
            if !upserts.is_empty() {
                self.store.upsert(table, &upserts).await?;
            }
            if !deleted.is_empty() {
                self.store.delete(table, &deleted).await?;
            }
            result.upserted += upserts.len();
            result.deleted += deleted.len();

            let more = strategy.advance(received);
            if let Some((query_id, token)) = strategy.delta_token() {
                if saved_token.map_or(true, |saved| token > saved) {
                    self.persisted.save_delta_token(table, query_id, token).await?;
                    saved_token = Some(token);
                }
            }
            if !more {
                break;
            }
        }
        Ok(())
    }

    /// Deletes the local records matching `query` without contacting the
    /// service. Returns the number of records deleted.
    ///
    /// Recorded errors of the table are cleared first. Delta tokens are
    /// reset for a whole-table purge, or for `query_id` when given.
    ///
    /// # Errors
    ///
    /// [`SyncError::PendingOperations`] if the table has queued operations.
    pub async fn purge(&self, query: &Query, query_id: Option<&str>) -> SyncResult<u64> {
        self.purge_with(query, query_id, false).await
    }

    /// Like [`purge`](Self::purge), but first drops the table's queued
    /// operations.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn force_purge(&self, query: &Query, query_id: Option<&str>) -> SyncResult<u64> {
        self.purge_with(query, query_id, true).await
    }

    async fn purge_with(&self, query: &Query, query_id: Option<&str>, force: bool) -> SyncResult<u64> {
        check_queryable_table(&query.table)?;
        if let Some(query_id) = query_id {
            pull::validate_query_id(query_id)?;
        }

        let table_lock = self.table_lock(&query.table);
        let _guard = table_lock.write().await;
        self.set_state(SyncState::Purging);
        let outcome = self.run_purge(query, query_id, force).await;
        self.finish(&outcome);
        outcome
    }

    async fn run_purge(&self, query: &Query, query_id: Option<&str>, force: bool) -> SyncResult<u64> {
        let table = query.table.as_str();
        {
            let mut state = self
                .lock_queue_when(|busy| busy.table == table)
                .await;
            if state.queue.pending_count(Some(table)) > 0 {
                if !force {
                    return Err(SyncError::PendingOperations {
                        table: table.to_string(),
                    });
                }
                let dropped = state.queue.remove_table(table);
                let ids: Vec<String> = dropped.into_iter().map(|op| op.id).collect();
                warn!(table, dropped = ids.len(), "force purge dropped pending operations");
                self.persisted.delete_operations(&ids).await?;
            }
        }

        self.persisted.clear_errors(Some(table)).await?;
        if query.is_whole_table() {
            self.persisted.delete_delta_tokens(table, None).await?;
        } else if let Some(query_id) = query_id {
            self.persisted.delete_delta_tokens(table, Some(query_id)).await?;
        }
        let deleted = self.store.delete_query(query).await?;
        info!(table, deleted, "purge complete");
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Recorded errors
    // ------------------------------------------------------------------

    /// Lists recorded push errors, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the errors table cannot be read.
    pub async fn operation_errors(&self) -> SyncResult<Vec<TableOperationError>> {
        self.persisted.load_errors(None).await
    }

    /// Removes every recorded push error. Queued operations are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the errors table cannot be written.
    pub async fn clear_operation_errors(&self) -> SyncResult<()> {
        self.persisted.clear_errors(None).await?;
        Ok(())
    }

    /// Resolves a recorded error by dropping its operation and storing
    /// `item` locally, typically the server's copy.
    ///
    /// # Errors
    ///
    /// - [`SyncError::OperationChanged`] if the operation was collapsed or
    ///   removed after the error was recorded
    /// - [`SyncError::InvalidItem`] if `item` is not the failed item
    pub async fn cancel_and_update(&self, error: &TableOperationError, item: Record) -> SyncResult<()> {
        if item_id(&item).as_deref() != Some(error.item_id.as_str()) {
            return Err(SyncError::InvalidItem(format!(
                "replacement item must have id '{}'",
                error.item_id
            )));
        }
        let table_lock = self.table_lock(&error.table_name);
        let _table = table_lock.read().await;
        let _state = self.cancel_operation(error).await?;
        self.store.upsert(&error.table_name, &[item]).await?;
        Ok(())
    }

    /// Resolves a recorded error by dropping its operation and deleting the
    /// local record.
    ///
    /// # Errors
    ///
    /// [`SyncError::OperationChanged`] if the operation was collapsed or
    /// removed after the error was recorded.
    pub async fn cancel_and_discard(&self, error: &TableOperationError) -> SyncResult<()> {
        let table_lock = self.table_lock(&error.table_name);
        let _table = table_lock.read().await;
        let _state = self.cancel_operation(error).await?;
        self.store
            .delete(&error.table_name, &[error.item_id.clone()])
            .await?;
        Ok(())
    }

    /// Removes the operation behind `error`. The returned guard keeps other
    /// mutations out until the caller's local write is done.
    async fn cancel_operation(
        &self,
        error: &TableOperationError,
    ) -> SyncResult<AsyncMutexGuard<'_, QueueState>> {
        let key = ItemKey::new(error.table_name.clone(), error.item_id.clone());
        let mut state = self.lock_item(&key).await;
        let operation = state
            .queue
            .find_by_id(&error.id)
            .filter(|op| op.version == error.operation_version)
            .cloned()
            .ok_or(SyncError::OperationChanged)?;

        self.persisted.delete_operations(&[operation.id.clone()]).await?;
        self.persisted.delete_errors(&[operation.id.clone()]).await?;
        state.queue.remove(&operation);
        debug!(table = %key.table, item_id = %key.item_id, "cancelled operation");
        Ok(state)
    }

    // ------------------------------------------------------------------
    // Locking and bookkeeping
    // ------------------------------------------------------------------

    fn table_lock(&self, table: &str) -> Arc<AsyncRwLock<()>> {
        let mut locks = self.table_locks.lock();
        Arc::clone(locks.entry(table.to_string()).or_default())
    }

    /// Locks the queue once no push is sending `key`.
    async fn lock_item(&self, key: &ItemKey) -> AsyncMutexGuard<'_, QueueState> {
        self.lock_queue_when(|busy| busy == key).await
    }

    /// Locks the queue once the in-flight item, if any, fails `blocks`.
    async fn lock_queue_when(
        &self,
        blocks: impl Fn(&ItemKey) -> bool,
    ) -> AsyncMutexGuard<'_, QueueState> {
        loop {
            let released = self.item_released.notified();
            let state = self.queue.lock().await;
            if !state.in_flight.as_ref().is_some_and(&blocks) {
                return state;
            }
            drop(state);
            released.await;
        }
    }

    async fn release_item(&self) {
        self.queue.lock().await.in_flight = None;
        self.item_released.notify_waiters();
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn finish<R>(&self, outcome: &SyncResult<R>) {
        match outcome {
            Ok(_) => self.set_state(SyncState::Synced),
            Err(e) => self.fail(e),
        }
    }

    fn fail(&self, error: &SyncError) {
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
    }
}

/// Default executor handed to the sync handler.
struct RemoteExecutor<'a, T: Transport> {
    remote: &'a RemoteClient<T>,
    operation: &'a TableOperation,
}

#[async_trait]
impl<T: Transport> OperationExecutor for RemoteExecutor<'_, T> {
    fn operation(&self) -> &TableOperation {
        self.operation
    }

    async fn execute(&self) -> RemoteResult<Option<Record>> {
        self.remote.execute(self.operation, None).await
    }

    async fn execute_with(&self, item: Record) -> RemoteResult<Option<Record>> {
        self.remote.execute(self.operation, Some(&item)).await
    }
}

fn operation_error(operation: &TableOperation, error: &RemoteError) -> TableOperationError {
    TableOperationError::new(
        operation,
        error.status(),
        error.to_string(),
        error.body().map(str::to_string),
    )
}

fn check_mutable_table(table: &str) -> SyncResult<()> {
    if table.trim().is_empty() || system::is_system_table(table) {
        return Err(SyncError::InvalidItem(format!(
            "'{table}' is not a writable table name"
        )));
    }
    Ok(())
}

fn check_queryable_table(table: &str) -> SyncResult<()> {
    if table.trim().is_empty() || system::is_system_table(table) {
        return Err(SyncError::InvalidQuery(format!(
            "'{table}' is not a syncable table name"
        )));
    }
    Ok(())
}
