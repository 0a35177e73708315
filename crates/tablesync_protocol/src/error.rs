//! Error types for protocol values.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding persisted protocol values.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A persisted row is missing a field or holds the wrong type.
    #[error("invalid {kind} record: field '{field}' is missing or malformed")]
    InvalidRecord {
        /// What was being decoded.
        kind: &'static str,
        /// The offending field.
        field: &'static str,
    },

    /// Unknown operation kind code.
    #[error("unknown operation kind code: {0}")]
    UnknownOperationKind(u64),

    /// Two persisted operations target the same item.
    #[error("queue holds more than one operation for item '{item_id}' in table '{table}'")]
    DuplicateQueueEntry {
        /// Table name.
        table: String,
        /// Item id.
        item_id: String,
    },

    /// Embedded JSON could not be parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A timestamp could not be parsed.
    #[error("invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
}
