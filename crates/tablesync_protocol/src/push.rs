//! Push cycle results.

use crate::operation_error::TableOperationError;
use serde::Serialize;

/// How a push cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PushStatus {
    /// Every operation in the cycle was attempted.
    Complete,
    /// The transport failed; the rest of the cycle was abandoned.
    CancelledByNetworkError,
    /// The remote service rejected the credentials (401/403).
    CancelledByAuthenticationError,
    /// The local store failed while recording an outcome.
    CancelledByLocalStoreError,
}

impl PushStatus {
    /// Returns true if the cycle stopped early.
    pub fn is_cancelled(&self) -> bool {
        !matches!(self, PushStatus::Complete)
    }
}

/// Summary of one push cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushCompletionResult {
    /// How the cycle ended.
    pub status: PushStatus,
    /// Per-operation failures that did not stop the cycle, in replay order.
    pub operation_errors: Vec<TableOperationError>,
    /// Number of operations the remote service accepted.
    pub pushed: usize,
}

impl PushCompletionResult {
    /// Creates a result for a cycle that has not attempted anything yet.
    pub fn new() -> Self {
        Self {
            status: PushStatus::Complete,
            operation_errors: Vec::new(),
            pushed: 0,
        }
    }

    /// Returns true if the cycle ran to the end without recording errors.
    pub fn is_success(&self) -> bool {
        self.status == PushStatus::Complete && self.operation_errors.is_empty()
    }
}

impl Default for PushCompletionResult {
    fn default() -> Self {
        Self::new()
    }
}
