//! Record representation shared by stores and the sync engine.

use serde_json::{Map, Value};

/// A single table row: a JSON object with an `id` and arbitrary properties.
pub type Record = Map<String, Value>;

/// Name of the property that identifies a record within its table.
pub const ID_FIELD: &str = "id";

/// Returns the record's id as a string.
///
/// String ids are returned as-is and numeric ids are rendered in decimal.
/// Missing, null, empty and any other id shapes yield `None`.
pub fn item_id(record: &Record) -> Option<String> {
    match record.get(ID_FIELD)? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
