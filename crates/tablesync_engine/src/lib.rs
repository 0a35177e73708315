//! # Tablesync Engine
//!
//! Offline table sync against a remote REST table service.
//!
//! This crate provides:
//! - [`SyncContext`], which applies local mutations and queues them
//! - Push: ordered replay of the queue with per-operation error capture
//! - Pull: paged and incremental refresh of a local table from a query
//! - Purge: local deletion without contacting the service
//! - [`SyncHandler`] hooks for custom push policies
//! - [`Transport`] abstraction with a scripted [`MockTransport`]
//!
//! ## Architecture
//!
//! Every mutation is written to the [`LocalStore`] right away and recorded
//! in an [`OperationQueue`] persisted next to the user's tables. A second
//! mutation on the same item collapses into the queued one. Push replays
//! the queue oldest first; pull always flushes pending work before it
//! overwrites local rows.
//!
//! ## Key Invariants
//!
//! - Local state is never overwritten while related operations are pending
//! - Operations reach the service in the order they were first queued
//! - A transport or authentication failure stops a push and keeps the
//!   failing operation queued
//! - Refused operations are recorded and stay queued until resolved

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod error;
mod handler;
mod pull;
mod queue_store;
mod remote;
mod state;
mod table;
mod transport;

pub use config::{PushScope, SyncConfig};
pub use context::SyncContext;
pub use error::{RemoteError, RemoteResult, SyncError, SyncResult};
pub use handler::{OperationErrorAction, OperationExecutor, PassthroughHandler, SyncHandler};
pub use pull::PullResult;
pub use remote::{QueryPage, RemoteClient};
pub use state::{SyncState, SyncStats};
pub use table::SyncTable;
pub use transport::{Method, MockTransport, RemoteRequest, RemoteResponse, Transport, TransportError};

pub use tablesync_protocol::{
    ItemKey, OperationQueue, PushCompletionResult, PushStatus, TableOperation, TableOperationError,
    TableOperationKind,
};
pub use tablesync_store::{LocalStore, Query, Record};
