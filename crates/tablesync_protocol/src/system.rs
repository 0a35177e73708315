//! Reserved table and column names.

/// Table holding the persisted operation queue.
pub const OPERATIONS_TABLE: &str = "__operations";

/// Table holding recorded push errors.
pub const ERRORS_TABLE: &str = "__errors";

/// Table holding incremental pull delta tokens.
pub const INCREMENTAL_PULL_TABLE: &str = "__incrementalPullData";

/// Soft-delete marker set by the remote service.
pub const DELETED: &str = "__deleted";

/// Server-maintained last modification time.
pub const UPDATED_AT: &str = "__updatedAt";

/// Server-maintained creation time.
pub const CREATED_AT: &str = "__createdAt";

/// Server-maintained optimistic concurrency token.
pub const VERSION: &str = "__version";

/// Prefix shared by every system property.
pub const SYSTEM_PREFIX: &str = "__";

/// Returns true if `table` is one of the engine's reserved tables.
pub fn is_system_table(table: &str) -> bool {
    table.starts_with(SYSTEM_PREFIX)
}

/// Returns true if `name` is a server-maintained system property.
pub fn is_system_property(name: &str) -> bool {
    name.starts_with(SYSTEM_PREFIX)
}
