//! Collapsing rules for two mutations on the same item.

use crate::operation::TableOperationKind;
use thiserror::Error;

/// What happens to a queued operation when another mutation arrives for
/// the same item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collapse {
    /// Keep a single operation of this kind, taking the newer snapshot.
    Keep(TableOperationKind),
    /// Drop the queued operation; the item never needs to reach the server.
    Cancel,
}

/// A mutation that cannot follow the operation already queued for its item.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollapseError {
    /// Insert after a queued insert.
    #[error("an insert operation on the item is already in the queue")]
    DuplicateInsert,

    /// Insert after a queued update.
    #[error("an update operation on the item is already in the queue")]
    InsertAfterUpdate,

    /// Any mutation after a queued delete.
    #[error("a delete operation on the item is already in the queue; {incoming} is not allowed")]
    PendingDelete {
        /// The rejected mutation.
        incoming: TableOperationKind,
    },
}

/// Decides how `incoming` merges into the `existing` queued operation.
///
/// | existing | incoming | result |
/// |---|---|---|
/// | insert | insert | error |
/// | insert | update | keep insert |
/// | insert | delete | cancel |
/// | update | insert | error |
/// | update | update | keep update |
/// | update | delete | keep delete |
/// | delete | any | error |
pub fn collapse(
    existing: TableOperationKind,
    incoming: TableOperationKind,
) -> Result<Collapse, CollapseError> {
    use TableOperationKind::{Delete, Insert, Update};

    match (existing, incoming) {
        (Insert, Insert) => Err(CollapseError::DuplicateInsert),
        (Insert, Update) => Ok(Collapse::Keep(Insert)),
        (Insert, Delete) => Ok(Collapse::Cancel),
        (Update, Insert) => Err(CollapseError::InsertAfterUpdate),
        (Update, Update) => Ok(Collapse::Keep(Update)),
        (Update, Delete) => Ok(Collapse::Keep(Delete)),
        (Delete, incoming) => Err(CollapseError::PendingDelete { incoming }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TableOperationKind::{Delete, Insert, Update};

    #[test]
    fn insert_then() {
        assert_eq!(collapse(Insert, Insert), Err(CollapseError::DuplicateInsert));
        assert_eq!(collapse(Insert, Update), Ok(Collapse::Keep(Insert)));
        assert_eq!(collapse(Insert, Delete), Ok(Collapse::Cancel));
    }

    #[test]
    fn update_then() {
        assert_eq!(collapse(Update, Insert), Err(CollapseError::InsertAfterUpdate));
        assert_eq!(collapse(Update, Update), Ok(Collapse::Keep(Update)));
        assert_eq!(collapse(Update, Delete), Ok(Collapse::Keep(Delete)));
    }

    #[test]
    fn delete_rejects_everything() {
        for incoming in [Insert, Update, Delete] {
            assert_eq!(
                collapse(Delete, incoming),
                Err(CollapseError::PendingDelete { incoming })
            );
        }
    }

    #[test]
    fn pending_delete_message_names_the_mutation() {
        let err = collapse(Delete, Update).unwrap_err();
        assert!(err.to_string().contains("update"));
    }
}
