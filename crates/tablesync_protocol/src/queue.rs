//! Ordered log of pending operations.

use crate::collapse::{collapse, Collapse, CollapseError};
use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::{ItemKey, TableOperation, TableOperationKind};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

/// Result of placing a mutation into the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// No operation was queued for the item; this one was appended.
    Appended(TableOperation),
    /// The queued operation absorbed the mutation and keeps its position.
    Collapsed(TableOperation),
    /// The queued operation and the mutation cancelled each other out.
    Cancelled(TableOperation),
}

impl EnqueueOutcome {
    /// Returns the affected queue entry: the new, rewritten or removed one.
    pub fn operation(&self) -> &TableOperation {
        match self {
            EnqueueOutcome::Appended(op)
            | EnqueueOutcome::Collapsed(op)
            | EnqueueOutcome::Cancelled(op) => op,
        }
    }
}

/// The pending-operation queue.
///
/// Holds at most one operation per item. Operations replay in ascending
/// sequence order, which is the order their items were first queued.
///
/// # Invariants
///
/// - Sequence numbers are unique and strictly increasing on append
/// - Collapsing keeps the original sequence number
/// - `bookmark()` is greater than every queued sequence number
#[derive(Debug, Clone)]
pub struct OperationQueue {
    operations: BTreeMap<u64, TableOperation>,
    by_item: HashMap<ItemKey, u64>,
    table_counts: HashMap<String, usize>,
    next_sequence: u64,
}

impl OperationQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            operations: BTreeMap::new(),
            by_item: HashMap::new(),
            table_counts: HashMap::new(),
            next_sequence: 1,
        }
    }

    /// Rebuilds a queue from persisted operations.
    ///
    /// # Errors
    ///
    /// Fails if two operations target the same item or share a sequence
    /// number.
    pub fn from_operations<I>(operations: I) -> ProtocolResult<Self>
    where
        I: IntoIterator<Item = TableOperation>,
    {
        let mut queue = Self::new();
        for op in operations {
            if queue.by_item.contains_key(&op.key()) {
                return Err(ProtocolError::DuplicateQueueEntry {
                    table: op.table_name,
                    item_id: op.item_id,
                });
            }
            if queue.operations.contains_key(&op.sequence) {
                return Err(ProtocolError::InvalidRecord {
                    kind: "operation",
                    field: "sequence",
                });
            }
            queue.insert(op);
        }
        Ok(queue)
    }

    /// Returns the operation queued for an item.
    pub fn get(&self, table: &str, item_id: &str) -> Option<&TableOperation> {
        self.get_by_key(&ItemKey::new(table, item_id))
    }

    /// Returns the operation queued for a key.
    pub fn get_by_key(&self, key: &ItemKey) -> Option<&TableOperation> {
        let sequence = self.by_item.get(key)?;
        self.operations.get(sequence)
    }

    /// Returns the operation with the given operation id.
    pub fn find_by_id(&self, id: &str) -> Option<&TableOperation> {
        self.operations.values().find(|op| op.id == id)
    }

    /// Works out how `incoming` would land in the queue without changing it.
    ///
    /// # Errors
    ///
    /// Returns the collapse error when the queued operation for the item
    /// does not accept the mutation.
    pub fn prepare(&self, incoming: TableOperation) -> Result<EnqueueOutcome, CollapseError> {
        let Some(existing) = self.get_by_key(&incoming.key()) else {
            let mut op = incoming;
            op.sequence = self.next_sequence;
            op.version = 1;
            return Ok(EnqueueOutcome::Appended(op));
        };

        match collapse(existing.kind, incoming.kind)? {
            Collapse::Cancel => Ok(EnqueueOutcome::Cancelled(existing.clone())),
            Collapse::Keep(kind) => {
                let mut op = existing.clone();
                op.kind = kind;
                op.item = match kind {
                    TableOperationKind::Delete => None,
                    _ => incoming.item,
                };
                op.version += 1;
                Ok(EnqueueOutcome::Collapsed(op))
            }
        }
    }

    /// Commits an outcome returned by [`prepare`](Self::prepare).
    ///
    /// The queue must not have changed since `prepare` was called.
    pub fn apply(&mut self, outcome: &EnqueueOutcome) {
        match outcome {
            EnqueueOutcome::Appended(op) => self.insert(op.clone()),
            EnqueueOutcome::Collapsed(op) => {
                if let Some(slot) = self.operations.get_mut(&op.sequence) {
                    *slot = op.clone();
                }
            }
            EnqueueOutcome::Cancelled(op) => {
                self.take(op.sequence);
            }
        }
    }

    /// Prepares and commits in one step.
    ///
    /// # Errors
    ///
    /// See [`prepare`](Self::prepare). The queue is unchanged on error.
    pub fn enqueue(&mut self, incoming: TableOperation) -> Result<EnqueueOutcome, CollapseError> {
        let outcome = self.prepare(incoming)?;
        self.apply(&outcome);
        Ok(outcome)
    }

    /// Returns the sequence number the next appended operation will get.
    ///
    /// A push snapshots this value and only replays operations below it.
    pub fn bookmark(&self) -> u64 {
        self.next_sequence
    }

    /// Returns the first operation after `after` and before `bookmark`,
    /// optionally restricted to some tables.
    pub fn next_after(
        &self,
        after: Option<u64>,
        bookmark: u64,
        tables: Option<&[String]>,
    ) -> Option<&TableOperation> {
        let start = match after {
            Some(after) if after >= bookmark => return None,
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        self.operations
            .range((start, Bound::Excluded(bookmark)))
            .map(|(_, op)| op)
            .find(|op| tables.map_or(true, |t| t.iter().any(|name| *name == op.table_name)))
    }

    /// Removes `op` if the queue still holds that exact revision of it.
    ///
    /// Returns false if the operation is gone or has since been collapsed.
    pub fn remove(&mut self, op: &TableOperation) -> bool {
        let current = self
            .operations
            .get(&op.sequence)
            .is_some_and(|queued| queued.id == op.id && queued.version == op.version);
        if current {
            self.take(op.sequence);
        }
        current
    }

    /// Removes every operation queued for `table`, in sequence order.
    pub fn remove_table(&mut self, table: &str) -> Vec<TableOperation> {
        let sequences: Vec<u64> = self
            .operations
            .values()
            .filter(|op| op.table_name == table)
            .map(|op| op.sequence)
            .collect();
        sequences.into_iter().filter_map(|s| self.take(s)).collect()
    }

    /// Counts queued operations, for one table or for all of them.
    pub fn pending_count(&self, table: Option<&str>) -> usize {
        match table {
            Some(table) => self.table_counts.get(table).copied().unwrap_or(0),
            None => self.operations.len(),
        }
    }

    /// Returns the number of queued operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Iterates over queued operations in replay order.
    pub fn iter(&self) -> impl Iterator<Item = &TableOperation> {
        self.operations.values()
    }

    fn insert(&mut self, op: TableOperation) {
        self.next_sequence = self.next_sequence.max(op.sequence + 1);
        self.by_item.insert(op.key(), op.sequence);
        *self.table_counts.entry(op.table_name.clone()).or_insert(0) += 1;
        self.operations.insert(op.sequence, op);
    }

    fn take(&mut self, sequence: u64) -> Option<TableOperation> {
        let op = self.operations.remove(&sequence)?;
        self.by_item.remove(&op.key());
        if let Some(count) = self.table_counts.get_mut(&op.table_name) {
            *count -= 1;
            if *count == 0 {
                self.table_counts.remove(&op.table_name);
            }
        }
        Some(op)
    }
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}
