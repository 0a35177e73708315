//! Property-based test generators using proptest.
//!
//! Provides strategies for generating table names, records and sequences
//! of local mutations.

use crate::fixtures::record;
use proptest::prelude::*;
use serde_json::json;
use tablesync_protocol::TableOperationKind;
use tablesync_store::Record;

/// One local mutation to replay against a context or a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Mutation kind.
    pub kind: TableOperationKind,
    /// Table name.
    pub table: String,
    /// Item id.
    pub item_id: String,
    /// Property value written by inserts and updates.
    pub value: i64,
}

/// Strategy for generating valid user table names.
pub fn table_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating item ids.
pub fn item_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{1,8}").expect("Invalid regex")
}

/// Strategy for generating operation kinds.
pub fn kind_strategy() -> impl Strategy<Value = TableOperationKind> {
    prop_oneof![
        Just(TableOperationKind::Insert),
        Just(TableOperationKind::Update),
        Just(TableOperationKind::Delete),
    ]
}

/// Strategy for generating records with an id and a few plain properties.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    (item_id_strategy(), "[a-zA-Z ]{0,20}", any::<i32>(), any::<bool>()).prop_map(
        |(id, text, n, done)| record(json!({ "id": id, "text": text, "n": n, "done": done })),
    )
}

/// Strategy for generating mutation sequences over a small key space.
///
/// Tables and ids are drawn from tiny pools so sequences hit the same
/// item often enough to exercise collapsing.
pub fn mutation_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<Mutation>> {
    let mutation = (
        kind_strategy(),
        prop::sample::select(vec!["todo", "notes"]),
        prop::sample::select(vec!["a", "b", "c"]),
        any::<i64>(),
    )
        .prop_map(|(kind, table, item_id, value)| Mutation {
            kind,
            table: table.to_string(),
            item_id: item_id.to_string(),
            value,
        });
    prop::collection::vec(mutation, 0..max_len)
}

impl Mutation {
    /// The record an insert or update writes.
    pub fn record(&self) -> Record {
        record(json!({ "id": self.item_id, "value": self.value }))
    }
}
