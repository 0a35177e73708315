//! # Tablesync Protocol
//!
//! Operation queue and push result types for tablesync.
//!
//! This crate provides:
//! - [`TableOperation`] for queued local mutations
//! - [`collapse`], the pure rule table for merging two mutations on one item
//! - [`OperationQueue`], the ordered pending-operation log
//! - [`TableOperationError`] for failed pushes kept for inspection
//! - [`PushCompletionResult`] summarizing one push cycle
//! - Names of the reserved system tables and columns
//!
//! This is a pure crate with no I/O operations.
//!
//! ## Key Invariants
//!
//! - At most one pending operation per (table, item id)
//! - Replay order is ascending sequence number
//! - A collapsed operation keeps the sequence number of the original

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collapse;
mod error;
mod operation;
mod operation_error;
mod push;
mod queue;
mod row;
pub mod system;

pub use collapse::{collapse, Collapse, CollapseError};
pub use error::{ProtocolError, ProtocolResult};
pub use operation::{ItemKey, TableOperation, TableOperationKind};
pub use operation_error::TableOperationError;
pub use push::{PushCompletionResult, PushStatus};
pub use queue::{EnqueueOutcome, OperationQueue};
