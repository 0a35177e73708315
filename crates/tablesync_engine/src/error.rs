//! Error types for the sync engine.

use crate::transport::TransportError;
use tablesync_protocol::{CollapseError, ProtocolError, PushCompletionResult, TableOperationKind};
use tablesync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for remote table calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// A remote table call that did not succeed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// No response was received.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The service answered with a non-success status.
    #[error("remote service returned HTTP {status}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: Option<String>,
    },

    /// The service answered with a body the client cannot use.
    #[error("invalid response from remote service: {0}")]
    InvalidResponse(String),

    /// An insert or update has no snapshot to send.
    #[error("operation on item '{item_id}' in table '{table}' has no item to send")]
    MissingItem {
        /// Table name.
        table: String,
        /// Item id.
        item_id: String,
    },

    /// A sync handler refused or failed the operation.
    #[error("sync handler failed: {0}")]
    Handler(String),
}

impl RemoteError {
    /// Returns the HTTP status, if the service answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the response body, if any.
    pub fn body(&self) -> Option<&str> {
        match self {
            RemoteError::Http { body, .. } => body.as_deref(),
            _ => None,
        }
    }

    /// Returns true if the request never reached the service.
    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Transport(_))
    }

    /// Returns true for 401 Unauthorized and 403 Forbidden.
    pub fn is_authentication(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The mutation cannot follow the operation already queued for its item.
    #[error("cannot queue {incoming} of item '{item_id}' in table '{table}': {source}")]
    QueueConflict {
        /// Table name.
        table: String,
        /// Item id.
        item_id: String,
        /// Kind of the queued operation.
        existing: TableOperationKind,
        /// Kind of the rejected mutation.
        incoming: TableOperationKind,
        /// The collapse rule that refused it.
        #[source]
        source: CollapseError,
    },

    /// A push cycle stopped early. Operations pushed before the failure stay
    /// pushed; the failing one and everything after it stay queued.
    #[error("push aborted ({:?}): {source}", .result.status)]
    PushAborted {
        /// Partial result of the cycle.
        result: Box<PushCompletionResult>,
        /// What stopped the cycle.
        #[source]
        source: Box<SyncError>,
    },

    /// A push cycle finished but some operations were refused.
    #[error("push completed with {} operation error(s)", .0.operation_errors.len())]
    PushCompletedWithErrors(Box<PushCompletionResult>),

    /// The push a pull must run first failed, so nothing was pulled.
    #[error("pull failed because the preceding push failed: {0}")]
    PullFailedDueToPush(#[source] Box<SyncError>),

    /// A remote call failed outside a push cycle.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The local store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A persisted queue or error row could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A purge was refused because the table still has queued operations.
    #[error("table '{table}' cannot be purged because it has pending operations")]
    PendingOperations {
        /// Table name.
        table: String,
    },

    /// An insert used an id already present in the local table.
    #[error("item '{item_id}' already exists in table '{table}'")]
    ItemAlreadyExists {
        /// Table name.
        table: String,
        /// Item id.
        item_id: String,
    },

    /// The item has no usable id, or the table name is reserved.
    #[error("invalid item: {0}")]
    InvalidItem(String),

    /// The pull or purge query is not supported.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The incremental pull query id is malformed.
    #[error("invalid query id '{0}': expected a letter followed by up to 24 letters or digits")]
    InvalidQueryId(String),

    /// The operation behind a recorded error changed or was removed since
    /// the error was recorded.
    #[error("the operation has been updated and cannot be cancelled")]
    OperationChanged,
}

impl SyncError {
    /// Returns the push result carried by a push or pull failure.
    pub fn push_result(&self) -> Option<&PushCompletionResult> {
        match self {
            SyncError::PushAborted { result, .. } => Some(result.as_ref()),
            SyncError::PushCompletedWithErrors(result) => Some(result.as_ref()),
            SyncError::PullFailedDueToPush(inner) => inner.push_result(),
            _ => None,
        }
    }

    /// Returns true if the error came out of a push cycle.
    pub fn is_push_failure(&self) -> bool {
        matches!(
            self,
            SyncError::PushAborted { .. } | SyncError::PushCompletedWithErrors(_)
        )
    }

    /// Returns true if calling again later may succeed without any change
    /// by the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(remote) => {
                remote.is_transport() || remote.status().is_some_and(|s| s >= 500)
            }
            SyncError::PushAborted { source, .. } => source.is_retryable(),
            SyncError::PullFailedDueToPush(inner) => inner.is_retryable(),
            _ => false,
        }
    }
}
