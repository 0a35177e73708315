//! Push failures kept for inspection and manual resolution.

use crate::error::ProtocolResult;
use crate::operation::{TableOperation, TableOperationKind};
use crate::row;
use crate::ProtocolError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tablesync_store::Record;

/// A queued operation the remote service refused.
///
/// The error shares its `id` with the failing operation, so an operation
/// has at most one recorded error at a time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableOperationError {
    /// Id of the failing operation.
    pub id: String,
    /// Version of the operation when it failed.
    pub operation_version: u64,
    /// Kind of the failing operation.
    pub kind: TableOperationKind,
    /// Target table.
    pub table_name: String,
    /// Target item id.
    pub item_id: String,
    /// Snapshot that was sent.
    pub item: Option<Record>,
    /// HTTP status, if the failure came from a response.
    pub status: Option<u16>,
    /// Human-readable failure description.
    pub message: String,
    /// Raw response body.
    pub raw_result: Option<String>,
    /// Server copy of the item, when the response body carried one.
    pub server_item: Option<Record>,
    /// When the failure was recorded.
    pub created_at: DateTime<Utc>,
}

impl TableOperationError {
    const KIND: &'static str = "operation error";

    /// Captures a failure of `operation`.
    pub fn new(
        operation: &TableOperation,
        status: Option<u16>,
        message: impl Into<String>,
        raw_result: Option<String>,
    ) -> Self {
        let server_item = raw_result
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .and_then(|value| match value {
                Value::Object(object) => Some(object),
                _ => None,
            });

        Self {
            id: operation.id.clone(),
            operation_version: operation.version,
            kind: operation.kind,
            table_name: operation.table_name.clone(),
            item_id: operation.item_id.clone(),
            item: operation.item.clone(),
            status,
            message: message.into(),
            raw_result,
            server_item,
            created_at: Utc::now(),
        }
    }

    /// Returns true for write conflicts (409 Conflict, 412 Precondition Failed).
    pub fn is_conflict(&self) -> bool {
        matches!(self.status, Some(409) | Some(412))
    }

    /// Encodes the error as a row of the errors table.
    pub fn to_record(&self) -> ProtocolResult<Record> {
        let mut row = Record::new();
        row.insert("id".into(), Value::String(self.id.clone()));
        row.insert("operationversion".into(), Value::from(self.operation_version));
        row.insert("operationkind".into(), Value::from(self.kind.to_code()));
        row.insert("tablename".into(), Value::String(self.table_name.clone()));
        row.insert("itemid".into(), Value::String(self.item_id.clone()));
        row.insert("item".into(), row::embed_object(self.item.as_ref())?);
        row.insert(
            "httpstatus".into(),
            self.status.map_or(Value::Null, Value::from),
        );
        row.insert("message".into(), Value::String(self.message.clone()));
        row.insert(
            "rawresult".into(),
            self.raw_result.clone().map_or(Value::Null, Value::String),
        );
        row.insert(
            "__createdat".into(),
            Value::String(row::format_timestamp(&self.created_at)),
        );
        Ok(row)
    }

    /// Decodes a row of the errors table.
    pub fn from_record(record: &Record) -> ProtocolResult<Self> {
        let code = row::unsigned(record, Self::KIND, "operationkind")?;
        let kind =
            TableOperationKind::from_code(code).ok_or(ProtocolError::UnknownOperationKind(code))?;
        let status = match record.get("httpstatus") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_u64()
                    .and_then(|s| u16::try_from(s).ok())
                    .ok_or(ProtocolError::InvalidRecord {
                        kind: Self::KIND,
                        field: "httpstatus",
                    })?,
            ),
        };
        let raw_result = row::optional_string(record, Self::KIND, "rawresult")?;
        let server_item = raw_result
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Record>(raw).ok());

        Ok(Self {
            id: row::string(record, Self::KIND, "id")?,
            operation_version: row::unsigned(record, Self::KIND, "operationversion")?,
            kind,
            table_name: row::string(record, Self::KIND, "tablename")?,
            item_id: row::string(record, Self::KIND, "itemid")?,
            item: row::embedded_object(record, Self::KIND, "item")?,
            status,
            message: row::string(record, Self::KIND, "message")?,
            raw_result,
            server_item,
            created_at: row::timestamp(record, Self::KIND, "__createdat")?,
        })
    }
}
