//! Persistence of queue, error and delta-token rows in the local store.

use crate::error::SyncResult;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::sync::Arc;
use tablesync_protocol::system::{ERRORS_TABLE, INCREMENTAL_PULL_TABLE, OPERATIONS_TABLE};
use tablesync_protocol::{OperationQueue, TableOperation, TableOperationError};
use tablesync_store::{LocalStore, Query, Record, SortDirection};

/// Reads and writes the engine's reserved tables.
///
/// Every change to the in-memory queue is mirrored here before it becomes
/// visible, so a new context over the same store resumes where the last
/// one stopped.
pub(crate) struct QueueStore<S: LocalStore> {
    store: Arc<S>,
}

impl<S: LocalStore> QueueStore<S> {
    pub(crate) fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub(crate) async fn load_queue(&self) -> SyncResult<OperationQueue> {
        let query = Query::new(OPERATIONS_TABLE).order_by("sequence", SortDirection::Ascending);
        let rows = self.store.read(&query).await?;
        let operations = rows
            .iter()
            .map(TableOperation::from_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(OperationQueue::from_operations(operations)?)
    }

    pub(crate) async fn save_operation(&self, operation: &TableOperation) -> SyncResult<()> {
        let row = operation.to_record()?;
        self.store.upsert(OPERATIONS_TABLE, &[row]).await?;
        Ok(())
    }

    pub(crate) async fn delete_operations(&self, ids: &[String]) -> SyncResult<()> {
        if !ids.is_empty() {
            self.store.delete(OPERATIONS_TABLE, ids).await?;
        }
        Ok(())
    }

    pub(crate) async fn save_error(&self, error: &TableOperationError) -> SyncResult<()> {
        let row = error.to_record()?;
        self.store.upsert(ERRORS_TABLE, &[row]).await?;
        Ok(())
    }

    pub(crate) async fn delete_errors(&self, ids: &[String]) -> SyncResult<()> {
        if !ids.is_empty() {
            self.store.delete(ERRORS_TABLE, ids).await?;
        }
        Ok(())
    }

    pub(crate) async fn load_errors(&self, table: Option<&str>) -> SyncResult<Vec<TableOperationError>> {
        let mut query = Query::new(ERRORS_TABLE).order_by("__createdat", SortDirection::Ascending);
        if let Some(table) = table {
            query = query.where_eq("tablename", table);
        }
        let rows = self.store.read(&query).await?;
        Ok(rows
            .iter()
            .map(TableOperationError::from_record)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Removes recorded errors, for one table or all of them.
    pub(crate) async fn clear_errors(&self, table: Option<&str>) -> SyncResult<u64> {
        let mut query = Query::new(ERRORS_TABLE);
        if let Some(table) = table {
            query = query.where_eq("tablename", table);
        }
        Ok(self.store.delete_query(&query).await?)
    }

    pub(crate) async fn load_delta_token(
        &self,
        table: &str,
        query_id: &str,
    ) -> SyncResult<Option<DateTime<Utc>>> {
        let row = self
            .store
            .lookup(INCREMENTAL_PULL_TABLE, &delta_token_id(table, query_id))
            .await?;
        let token = row
            .as_ref()
            .and_then(|r| r.get("maxupdateddate"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));
        Ok(token)
    }

    pub(crate) async fn save_delta_token(
        &self,
        table: &str,
        query_id: &str,
        token: DateTime<Utc>,
    ) -> SyncResult<()> {
        let mut row = Record::new();
        row.insert("id".into(), Value::String(delta_token_id(table, query_id)));
        row.insert("tablename".into(), Value::String(table.to_string()));
        row.insert(
            "maxupdateddate".into(),
            Value::String(token.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        self.store.upsert(INCREMENTAL_PULL_TABLE, &[row]).await?;
        Ok(())
    }

    /// Removes delta tokens of a table, or the single token of one query.
    pub(crate) async fn delete_delta_tokens(&self, table: &str, query_id: Option<&str>) -> SyncResult<()> {
        match query_id {
            Some(query_id) => {
                self.store
                    .delete(INCREMENTAL_PULL_TABLE, &[delta_token_id(table, query_id)])
                    .await?
            }
            None => {
                let query = Query::new(INCREMENTAL_PULL_TABLE).where_eq("tablename", table);
                self.store.delete_query(&query).await?;
            }
        }
        Ok(())
    }
}

fn delta_token_id(table: &str, query_id: &str) -> String {
    format!("{table}_{query_id}")
}
