//! REST client for the remote table service.
//!
//! Maps table operations and queries onto the service's HTTP surface:
//!
//! | call | request |
//! |---|---|
//! | insert | `POST {base}/tables/{table}` |
//! | update | `PATCH {base}/tables/{table}/{id}` |
//! | delete | `DELETE {base}/tables/{table}/{id}` |
//! | query | `GET {base}/tables/{table}?$filter=...` |
//!
//! Every request carries the configured feature header so the service can
//! tell sync traffic from direct table calls.

use crate::config::SyncConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::transport::{Method, RemoteRequest, RemoteResponse, Transport};
use serde_json::Value;
use std::sync::Arc;
use tablesync_protocol::system;
use tablesync_protocol::{TableOperation, TableOperationKind};
use tablesync_store::{Filter, Query, Record, SortDirection};

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryPage {
    /// Records in the order the service returned them.
    pub records: Vec<Record>,
    /// Total match count, when requested and reported.
    pub total_count: Option<u64>,
}

/// Client for one remote table service.
pub struct RemoteClient<T: Transport> {
    transport: Arc<T>,
    base_url: String,
    feature_header: String,
    feature_value: String,
}

impl<T: Transport> RemoteClient<T> {
    /// Creates a client sending through `transport`.
    pub fn new(transport: Arc<T>, config: &SyncConfig) -> Self {
        Self {
            transport,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            feature_header: config.feature_header.clone(),
            feature_value: config.feature_value.clone(),
        }
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the URL of a table.
    pub fn table_url(&self, table: &str) -> String {
        format!("{}/tables/{}", self.base_url, urlencoding::encode(table))
    }

    /// Returns the URL of one item.
    pub fn item_url(&self, table: &str, item_id: &str) -> String {
        format!("{}/{}", self.table_url(table), urlencoding::encode(item_id))
    }

    /// Returns the URL that runs `query`.
    pub fn query_url(&self, query: &Query) -> String {
        let mut params: Vec<(&str, String)> = Vec::new();
        if !query.filters.is_empty() {
            params.push(("$filter", filter_expression(&query.filters)));
        }
        if !query.order_by.is_empty() {
            let clauses: Vec<String> = query
                .order_by
                .iter()
                .map(|o| match o.direction {
                    SortDirection::Ascending => format!("{} asc", o.field),
                    SortDirection::Descending => format!("{} desc", o.field),
                })
                .collect();
            params.push(("$orderby", clauses.join(",")));
        }
        if let Some(skip) = query.skip {
            params.push(("$skip", skip.to_string()));
        }
        if let Some(top) = query.top {
            params.push(("$top", top.to_string()));
        }
        if !query.select.is_empty() {
            params.push(("$select", query.select.join(",")));
        }
        if query.include_total_count {
            params.push(("$inlinecount", "allpages".to_string()));
        }
        if query.include_deleted {
            params.push(("__includeDeleted", "true".to_string()));
        }

        let url = self.table_url(&query.table);
        if params.is_empty() {
            return url;
        }
        let encoded: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        format!("{}?{}", url, encoded.join("&"))
    }

    /// Creates an item. Returns the stored item as the service reports it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is not an object.
    pub async fn insert(&self, table: &str, item: &Record) -> RemoteResult<Record> {
        let body = without_system_properties(item);
        let request = RemoteRequest::new(Method::Post, self.table_url(table))
            .with_body(Value::Object(body).to_string());
        let response = self.send(request).await?;
        record_from_response(&response, item)
    }

    /// Replaces an item. Sends `If-Match` when the item carries a version.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is not an object.
    pub async fn update(&self, table: &str, item_id: &str, item: &Record) -> RemoteResult<Record> {
        let body = without_system_properties(item);
        let mut request = RemoteRequest::new(Method::Patch, self.item_url(table, item_id))
            .with_body(Value::Object(body).to_string());
        if let Some(version) = item.get(system::VERSION).and_then(Value::as_str) {
            request = request.with_header("If-Match", format!("\"{version}\""));
        }
        let response = self.send(request).await?;
        record_from_response(&response, item)
    }

    /// Deletes an item. An item that is already gone counts as deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails with anything but 404.
    pub async fn delete(&self, table: &str, item_id: &str) -> RemoteResult<()> {
        let request = RemoteRequest::new(Method::Delete, self.item_url(table, item_id));
        match self.send(request).await {
            Ok(_) => Ok(()),
            Err(RemoteError::Http { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Runs a query.
    ///
    /// Accepts either a bare JSON array or an object with a `results` array
    /// and an optional `count`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body has neither shape.
    pub async fn query(&self, query: &Query) -> RemoteResult<QueryPage> {
        let request = RemoteRequest::new(Method::Get, self.query_url(query));
        let response = self.send(request).await?;
        let body = response.body.as_deref().unwrap_or("[]");
        let value: Value = serde_json::from_str(body)
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;

        let (results, total_count) = match value {
            Value::Array(results) => (results, None),
            Value::Object(mut object) => match object.remove("results") {
                Some(Value::Array(results)) => {
                    (results, object.get("count").and_then(Value::as_u64))
                }
                _ => {
                    return Err(RemoteError::InvalidResponse(
                        "query response object has no results array".into(),
                    ))
                }
            },
            _ => {
                return Err(RemoteError::InvalidResponse(
                    "query response is neither an array nor an object".into(),
                ))
            }
        };

        let records = results
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(record) => Some(record),
                _ => None,
            })
            .collect();
        Ok(QueryPage {
            records,
            total_count,
        })
    }

    /// Replays a queued operation, using `item` in place of its snapshot
    /// when given. Returns the server copy for inserts and updates.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::MissingItem`] if an insert or update has no
    /// item to send, or the error of the underlying call.
    pub async fn execute(
        &self,
        operation: &TableOperation,
        item: Option<&Record>,
    ) -> RemoteResult<Option<Record>> {
        let item = item.or(operation.item.as_ref());
        let missing = || RemoteError::MissingItem {
            table: operation.table_name.clone(),
            item_id: operation.item_id.clone(),
        };

        match operation.kind {
            TableOperationKind::Insert => {
                let item = item.ok_or_else(missing)?;
                self.insert(&operation.table_name, item).await.map(Some)
            }
            TableOperationKind::Update => {
                let item = item.ok_or_else(missing)?;
                self.update(&operation.table_name, &operation.item_id, item)
                    .await
                    .map(Some)
            }
            TableOperationKind::Delete => self
                .delete(&operation.table_name, &operation.item_id)
                .await
                .map(|()| None),
        }
    }

    async fn send(&self, request: RemoteRequest) -> RemoteResult<RemoteResponse> {
        let request = request.with_header(self.feature_header.clone(), self.feature_value.clone());
        let request = if request.body.is_some() {
            request.with_header("Content-Type", "application/json")
        } else {
            request
        };

        let response = self.transport.send(request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(RemoteError::Http {
                status: response.status,
                body: response.body,
            })
        }
    }
}

fn without_system_properties(item: &Record) -> Record {
    item.iter()
        .filter(|(k, _)| !system::is_system_property(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Parses the service's copy of an item, falling back to what was sent
/// when the service returns no body.
fn record_from_response(response: &RemoteResponse, sent: &Record) -> RemoteResult<Record> {
    let body = match response.body.as_deref() {
        Some(body) if !body.trim().is_empty() => body,
        _ => return Ok(sent.clone()),
    };
    match serde_json::from_str(body) {
        Ok(Value::Object(record)) => Ok(record),
        Ok(_) => Err(RemoteError::InvalidResponse(
            "expected a JSON object".into(),
        )),
        Err(e) => Err(RemoteError::InvalidResponse(e.to_string())),
    }
}

fn filter_expression(filters: &[Filter]) -> String {
    filters
        .iter()
        .map(|f| format!("({} {} {})", f.field, f.op.as_str(), literal(&f.field, &f.value)))
        .collect::<Vec<_>>()
        .join(" and ")
}

fn literal(field: &str, value: &Value) -> String {
    match value {
        Value::String(s) if field == system::UPDATED_AT || field == system::CREATED_AT => {
            format!("datetimeoffset'{s}'")
        }
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => other.to_string(),
    }
}
