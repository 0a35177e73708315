//! Paging strategies for pulling a remote query into the local store.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tablesync_protocol::system;
use tablesync_store::{
    item_id, Filter, FilterOp, OrderBy, Query, Record, SortDirection, ID_FIELD,
};

/// Summary of one pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullResult {
    /// Whether pending operations were pushed before querying.
    pub pushed_before: bool,
    /// Records written to the local table.
    pub upserted: usize,
    /// Records removed from the local table because the service reported
    /// them deleted.
    pub deleted: usize,
    /// Remote pages requested.
    pub pages: usize,
}

/// Checks that a query can be pulled.
pub(crate) fn validate(query: &Query, query_id: Option<&str>) -> SyncResult<()> {
    if !query.select.is_empty() {
        return Err(SyncError::InvalidQuery(
            "pull query with select clause is not supported".into(),
        ));
    }
    if let Some(query_id) = query_id {
        validate_query_id(query_id)?;
        if !query.order_by.is_empty() {
            return Err(SyncError::InvalidQuery(
                "incremental pull query must not have orderby clause".into(),
            ));
        }
        if query.top.is_some() || query.skip.is_some() {
            return Err(SyncError::InvalidQuery(
                "incremental pull query must not have skip or top specified".into(),
            ));
        }
    }
    Ok(())
}

/// A query id is a letter followed by at most 24 letters or digits.
pub(crate) fn validate_query_id(query_id: &str) -> SyncResult<()> {
    let mut chars = query_id.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric())
        && query_id.len() <= 25;
    if valid {
        Ok(())
    } else {
        Err(SyncError::InvalidQueryId(query_id.to_string()))
    }
}

/// Splits a page of remote records into upserts and deleted ids.
///
/// Records without an id are dropped.
pub(crate) fn partition(records: Vec<Record>) -> (Vec<Record>, Vec<String>) {
    let mut upserts = Vec::new();
    let mut deleted = Vec::new();
    for record in records {
        let Some(id) = item_id(&record) else {
            continue;
        };
        let is_deleted = record
            .get(system::DELETED)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if is_deleted {
            deleted.push(id);
        } else {
            upserts.push(record);
        }
    }
    (upserts, deleted)
}

/// Delta token state of an incremental pull.
struct DeltaState {
    query_id: String,
    original_filters: Vec<Filter>,
    token: DateTime<Utc>,
    max_updated_at: DateTime<Utc>,
}

/// Walks a remote query page by page.
///
/// Plain pulls use `$skip` paging. Incremental pulls filter on
/// `__updatedAt >= token` in ascending `__updatedAt` order and restart from
/// the first page whenever a page moves the token forward; pages that do
/// not move it fall back to `$skip` paging.
pub(crate) struct PullStrategy {
    query: Query,
    page_size: u64,
    skip: u64,
    remaining: Option<u64>,
    delta: Option<DeltaState>,
}

impl PullStrategy {
    pub(crate) fn plain(query: &Query, page_size: u64) -> Self {
        let mut base = query.clone();
        if base.order_by.is_empty() {
            base = base.order_by(ID_FIELD, SortDirection::Ascending);
        }
        Self {
            skip: query.skip.unwrap_or(0),
            remaining: query.top,
            query: base,
            page_size,
            delta: None,
        }
    }

    pub(crate) fn incremental(
        query: &Query,
        page_size: u64,
        query_id: &str,
        token: Option<DateTime<Utc>>,
    ) -> Self {
        let token = token.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let mut strategy = Self {
            query: query.clone(),
            page_size,
            skip: 0,
            remaining: None,
            delta: Some(DeltaState {
                query_id: query_id.to_string(),
                original_filters: query.filters.clone(),
                token,
                max_updated_at: token,
            }),
        };
        strategy.apply_token();
        strategy
    }

    /// Returns the query for the next page, or `None` when done.
    pub(crate) fn next_query(&self) -> Option<Query> {
        let top = match self.remaining {
            Some(0) => return None,
            Some(remaining) => remaining.min(self.page_size),
            None => self.page_size,
        };
        let mut page = self.query.clone();
        page.skip = Some(self.skip);
        page.top = Some(top);
        page.include_deleted = true;
        page.include_total_count = false;
        Some(page)
    }

    /// Records the `__updatedAt` of a received record.
    pub(crate) fn observe(&mut self, record: &Record) {
        let Some(delta) = self.delta.as_mut() else {
            return;
        };
        let updated_at = record
            .get(system::UPDATED_AT)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));
        if let Some(updated_at) = updated_at {
            if updated_at > delta.max_updated_at {
                delta.max_updated_at = updated_at;
            }
        }
    }

    /// Moves past a page of `received` records. Returns false when done.
    pub(crate) fn advance(&mut self, received: u64) -> bool {
        if received == 0 {
            return false;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(received);
            if *remaining == 0 {
                return false;
            }
        }

        let token_moved = self
            .delta
            .as_ref()
            .is_some_and(|d| d.max_updated_at > d.token);
        if token_moved {
            self.apply_token();
            self.skip = 0;
        } else {
            self.skip += received;
        }
        true
    }

    /// Returns the delta token to persist, if the pull is incremental.
    pub(crate) fn delta_token(&self) -> Option<(&str, DateTime<Utc>)> {
        self.delta
            .as_ref()
            .map(|d| (d.query_id.as_str(), d.max_updated_at))
    }

    fn apply_token(&mut self) {
        let Some(delta) = self.delta.as_mut() else {
            return;
        };
        delta.token = delta.max_updated_at;
        let mut filters = delta.original_filters.clone();
        filters.push(Filter::new(
            system::UPDATED_AT,
            FilterOp::Ge,
            delta.token.to_rfc3339_opts(SecondsFormat::Millis, true),
        ));
        self.query.filters = filters;
        self.query.order_by = vec![OrderBy {
            field: system::UPDATED_AT.to_string(),
            direction: SortDirection::Ascending,
        }];
    }
}
