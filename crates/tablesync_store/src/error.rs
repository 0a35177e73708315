//! Error types for local store operations.

use std::io;
use thiserror::Error;

/// Result type for local store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The persisted store could not be understood.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// A record could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record written to the store had no usable `id`.
    #[error("record written to table '{table}' has no id")]
    MissingId {
        /// The table that was written.
        table: String,
    },
}
