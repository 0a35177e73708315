//! Queued table operations.

use crate::error::{ProtocolError, ProtocolResult};
use crate::row;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tablesync_store::Record;
use uuid::Uuid;

/// Kind of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableOperationKind {
    /// Create the item remotely.
    Insert,
    /// Replace the item remotely.
    Update,
    /// Remove the item remotely.
    Delete,
}

impl TableOperationKind {
    /// Returns the persisted code for this kind.
    pub fn to_code(self) -> u8 {
        match self {
            TableOperationKind::Insert => 0,
            TableOperationKind::Update => 1,
            TableOperationKind::Delete => 2,
        }
    }

    /// Parses a persisted code.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(TableOperationKind::Insert),
            1 => Some(TableOperationKind::Update),
            2 => Some(TableOperationKind::Delete),
            _ => None,
        }
    }

    /// Returns the lowercase name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            TableOperationKind::Insert => "insert",
            TableOperationKind::Update => "update",
            TableOperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for TableOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a logical record: table name plus item id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    /// Table name.
    pub table: String,
    /// Item id.
    pub item_id: String,
}

impl ItemKey {
    /// Creates a key.
    pub fn new(table: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            item_id: item_id.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.item_id)
    }
}

/// A pending local mutation waiting to be pushed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableOperation {
    /// Unique operation id.
    pub id: String,
    /// Mutation kind.
    pub kind: TableOperationKind,
    /// Target table.
    pub table_name: String,
    /// Target item id.
    pub item_id: String,
    /// Item snapshot sent on replay. Always `None` for deletes.
    pub item: Option<Record>,
    /// Replay position. Assigned by the queue.
    pub sequence: u64,
    /// Bumped every time another mutation collapses onto this one.
    pub version: u64,
    /// When the operation was first queued.
    pub created_at: DateTime<Utc>,
}

impl TableOperation {
    const KIND: &'static str = "operation";

    /// Creates an unqueued operation with a fresh id.
    pub fn new(
        kind: TableOperationKind,
        table_name: impl Into<String>,
        item_id: impl Into<String>,
        item: Option<Record>,
    ) -> Self {
        let item = match kind {
            TableOperationKind::Delete => None,
            _ => item,
        };
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            table_name: table_name.into(),
            item_id: item_id.into(),
            item,
            sequence: 0,
            version: 1,
            created_at: Utc::now(),
        }
    }

    /// Returns the key of the item this operation targets.
    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.table_name.clone(), self.item_id.clone())
    }

    /// Encodes the operation as a row of the operations table.
    pub fn to_record(&self) -> ProtocolResult<Record> {
        let mut row = Record::new();
        row.insert("id".into(), Value::String(self.id.clone()));
        row.insert("kind".into(), Value::from(self.kind.to_code()));
        row.insert("tablename".into(), Value::String(self.table_name.clone()));
        row.insert("itemid".into(), Value::String(self.item_id.clone()));
        row.insert("item".into(), row::embed_object(self.item.as_ref())?);
        row.insert("sequence".into(), Value::from(self.sequence));
        row.insert("version".into(), Value::from(self.version));
        row.insert(
            "__createdat".into(),
            Value::String(row::format_timestamp(&self.created_at)),
        );
        Ok(row)
    }

    /// Decodes a row of the operations table.
    pub fn from_record(row: &Record) -> ProtocolResult<Self> {
        let code = row::unsigned(row, Self::KIND, "kind")?;
        let kind =
            TableOperationKind::from_code(code).ok_or(ProtocolError::UnknownOperationKind(code))?;

        Ok(Self {
            id: row::string(row, Self::KIND, "id")?,
            kind,
            table_name: row::string(row, Self::KIND, "tablename")?,
            item_id: row::string(row, Self::KIND, "itemid")?,
            item: row::embedded_object(row, Self::KIND, "item")?,
            sequence: row::unsigned(row, Self::KIND, "sequence")?,
            version: row::unsigned(row, Self::KIND, "version")?,
            created_at: row::timestamp(row, Self::KIND, "__createdat")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_codes() {
        for kind in [
            TableOperationKind::Insert,
            TableOperationKind::Update,
            TableOperationKind::Delete,
        ] {
            assert_eq!(TableOperationKind::from_code(kind.to_code() as u64), Some(kind));
        }
        assert_eq!(TableOperationKind::from_code(3), None);
    }

    #[test]
    fn delete_drops_snapshot() {
        let item = json!({"id": "a"}).as_object().cloned();
        let op = TableOperation::new(TableOperationKind::Delete, "todo", "a", item);
        assert!(op.item.is_none());
    }

    #[test]
    fn row_encoding_preserves_operation() {
        let item = json!({"id": "a", "text": "it's"}).as_object().cloned();
        let mut op = TableOperation::new(TableOperationKind::Update, "todo", "a", item);
        op.sequence = 12;
        op.version = 3;

        let row = op.to_record().unwrap();
        assert_eq!(row["kind"], json!(1));
        assert!(row["item"].is_string());

        let decoded = TableOperation::from_record(&row).unwrap();
        assert_eq!(decoded.id, op.id);
        assert_eq!(decoded.item, op.item);
        assert_eq!(decoded.sequence, 12);
        assert_eq!(decoded.version, 3);
        assert_eq!(
            decoded.created_at.timestamp_millis(),
            op.created_at.timestamp_millis()
        );
    }

    #[test]
    fn decoding_rejects_bad_rows() {
        let op = TableOperation::new(TableOperationKind::Insert, "todo", "a", None);
        let mut row = op.to_record().unwrap();
        row.insert("kind".into(), json!(7));
        assert!(matches!(
            TableOperation::from_record(&row),
            Err(ProtocolError::UnknownOperationKind(7))
        ));

        let mut row = op.to_record().unwrap();
        row.remove("tablename");
        assert!(matches!(
            TableOperation::from_record(&row),
            Err(ProtocolError::InvalidRecord {
                field: "tablename",
                ..
            })
        ));
    }

    #[test]
    fn key_display() {
        assert_eq!(ItemKey::new("todo", "a").to_string(), "todo/a");
    }
}
