//! Helpers for reading persisted rows.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tablesync_store::Record;

pub(crate) fn string(row: &Record, kind: &'static str, field: &'static str) -> ProtocolResult<String> {
    match row.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(ProtocolError::InvalidRecord { kind, field }),
    }
}

pub(crate) fn optional_string(
    row: &Record,
    kind: &'static str,
    field: &'static str,
) -> ProtocolResult<Option<String>> {
    match row.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ProtocolError::InvalidRecord { kind, field }),
    }
}

pub(crate) fn unsigned(row: &Record, kind: &'static str, field: &'static str) -> ProtocolResult<u64> {
    row.get(field)
        .and_then(Value::as_u64)
        .ok_or(ProtocolError::InvalidRecord { kind, field })
}

/// Reads an object stored as embedded JSON text.
pub(crate) fn embedded_object(
    row: &Record,
    kind: &'static str,
    field: &'static str,
) -> ProtocolResult<Option<Record>> {
    match optional_string(row, kind, field)? {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub(crate) fn embed_object(object: Option<&Record>) -> ProtocolResult<Value> {
    Ok(match object {
        Some(object) => Value::String(serde_json::to_string(object)?),
        None => Value::Null,
    })
}

pub(crate) fn timestamp(
    row: &Record,
    kind: &'static str,
    field: &'static str,
) -> ProtocolResult<DateTime<Utc>> {
    let text = string(row, kind, field)?;
    Ok(DateTime::parse_from_rfc3339(&text)?.with_timezone(&Utc))
}

pub(crate) fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
