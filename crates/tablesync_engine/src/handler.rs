//! Per-operation push policy.

use crate::error::RemoteResult;
use async_trait::async_trait;
use tablesync_protocol::{PushCompletionResult, TableOperation, TableOperationError};
use tablesync_store::Record;

/// Performs the default remote execution of one queued operation.
///
/// Handed to [`SyncHandler::execute_table_operation`] so a handler can run
/// the operation as queued, run it with a different item, or not run it.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    /// The operation being pushed.
    fn operation(&self) -> &TableOperation;

    /// Sends the operation with its queued snapshot.
    async fn execute(&self) -> RemoteResult<Option<Record>>;

    /// Sends the operation with `item` in place of its snapshot.
    async fn execute_with(&self, item: Record) -> RemoteResult<Option<Record>>;
}

/// What to do with an operation whose push failed recoverably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationErrorAction {
    /// Keep the operation queued for a later push or manual resolution.
    #[default]
    Retain,
    /// Drop the operation; the local record keeps its current contents.
    Discard,
}

/// Strategy invoked by the push engine.
///
/// Every method has a default, so `struct MyHandler; impl SyncHandler for
/// MyHandler {}` behaves like [`PassthroughHandler`].
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Pushes one operation and returns the server copy of the item.
    ///
    /// Errors returned here are classified like transport results:
    /// transport failures and 401/403 abort the push, anything else is
    /// recorded against the operation.
    async fn execute_table_operation(
        &self,
        executor: &dyn OperationExecutor,
    ) -> RemoteResult<Option<Record>> {
        executor.execute().await
    }

    /// Decides the fate of an operation whose push was refused.
    fn on_operation_error(&self, _error: &TableOperationError) -> OperationErrorAction {
        OperationErrorAction::Retain
    }

    /// Called once at the end of every push cycle.
    async fn on_push_complete(&self, _result: &PushCompletionResult) {}
}

/// Executes every operation unmodified and keeps failed operations queued.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughHandler;

#[async_trait]
impl SyncHandler for PassthroughHandler {}
