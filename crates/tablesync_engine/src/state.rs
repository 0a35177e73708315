//! Engine state and statistics.

use chrono::{DateTime, Utc};

/// What the engine is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Nothing has run yet.
    Idle,
    /// A push cycle is draining the queue.
    Pushing,
    /// A pull is querying the remote table.
    Pulling,
    /// A purge is clearing a local table.
    Purging,
    /// The last push, pull or purge succeeded.
    Synced,
    /// The last push, pull or purge failed.
    Error,
}

impl SyncState {
    /// Returns true if a push, pull or purge is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Pushing | SyncState::Pulling | SyncState::Purging
        )
    }
}

/// Counters accumulated over the life of a context.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Push cycles run, whatever their outcome.
    pub pushes: u64,
    /// Operations the remote service accepted.
    pub operations_pushed: u64,
    /// Operation errors recorded.
    pub operation_errors: u64,
    /// Pulls completed.
    pub pulls: u64,
    /// Records written by pulls.
    pub records_pulled: u64,
    /// Records deleted by pulls.
    pub records_deleted: u64,
    /// Completion time of the last push cycle.
    pub last_push_at: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}
