//! In-process fake of the remote table service.
//!
//! Speaks the same REST dialect the engine's client does: `POST
//! /tables/{t}`, `PATCH` and `DELETE /tables/{t}/{id}`, and `GET
//! /tables/{t}?$filter=...`. Every write stamps `__version`,
//! `__updatedAt` and `__createdAt`; deletes are soft, so incremental pulls
//! see them.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tablesync_engine::{Method, RemoteRequest, RemoteResponse, Transport, TransportError};
use tablesync_protocol::system;
use tablesync_store::{item_id, Filter, FilterOp, Query, Record, SortDirection, ID_FIELD};
use uuid::Uuid;

/// A scripted failure for the next matching request.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Answer with this status and a small JSON error body.
    Status(u16),
    /// Fail without a response.
    Transport(TransportError),
}

#[derive(Default)]
struct ServiceState {
    tables: HashMap<String, BTreeMap<String, Record>>,
    ticks: u64,
}

impl ServiceState {
    /// Advances the service clock by one millisecond per write.
    fn tick(&mut self) -> (u64, DateTime<Utc>) {
        self.ticks += 1;
        (self.ticks, epoch() + Duration::milliseconds(self.ticks as i64))
    }
}

/// In-memory remote table service implementing [`Transport`].
///
/// Records every request, including those answered by an injected
/// [`Fault`].
#[derive(Default)]
pub struct FakeTableService {
    state: Mutex<ServiceState>,
    faults: Mutex<VecDeque<(Option<Method>, Fault)>>,
    requests: Mutex<Vec<RemoteRequest>>,
}

impl FakeTableService {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes records directly on the service, as another client would.
    ///
    /// Existing records are replaced. Returns the stamped copies.
    pub fn seed(&self, table: &str, records: impl IntoIterator<Item = Record>) -> Vec<Record> {
        let mut state = self.state.lock();
        let mut stored = Vec::new();
        for mut record in records {
            let id = item_id(&record).unwrap_or_else(|| Uuid::new_v4().to_string());
            record.insert(ID_FIELD.into(), Value::String(id.clone()));
            let (tick, now) = state.tick();
            let created = state
                .tables
                .get(table)
                .and_then(|rows| rows.get(&id))
                .and_then(|r| r.get(system::CREATED_AT).cloned());
            stamp(&mut record, tick, now, created);
            state
                .tables
                .entry(table.to_string())
                .or_default()
                .insert(id, record.clone());
            stored.push(record);
        }
        stored
    }

    /// Soft-deletes a record directly on the service.
    ///
    /// Returns false if there was no live record.
    pub fn delete_on_service(&self, table: &str, id: &str) -> bool {
        let mut state = self.state.lock();
        let (tick, now) = state.tick();
        match state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.get_mut(id))
            .filter(|r| !is_deleted(r))
        {
            Some(record) => {
                mark_deleted(record, tick, now);
                true
            }
            None => false,
        }
    }

    /// Returns a live record.
    pub fn item(&self, table: &str, id: &str) -> Option<Record> {
        self.state
            .lock()
            .tables
            .get(table)
            .and_then(|rows| rows.get(id))
            .filter(|r| !is_deleted(r))
            .cloned()
    }

    /// Returns the live records of a table ordered by id.
    pub fn items(&self, table: &str) -> Vec<Record> {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|rows| rows.values().filter(|r| !is_deleted(r)).cloned().collect())
            .unwrap_or_default()
    }

    /// Fails the next request with `fault`.
    pub fn fail_next(&self, fault: Fault) {
        self.faults.lock().push_back((None, fault));
    }

    /// Fails the next request using `method` with `fault`.
    pub fn fail_next_on(&self, method: Method, fault: Fault) {
        self.faults.lock().push_back((Some(method), fault));
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns the number of requests received with `method`.
    pub fn request_count_for(&self, method: Method) -> usize {
        self.requests.lock().iter().filter(|r| r.method == method).count()
    }

    /// Forgets recorded requests.
    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    fn take_fault(&self, method: Method) -> Option<Fault> {
        let mut faults = self.faults.lock();
        let index = faults
            .iter()
            .position(|(m, _)| m.map_or(true, |m| m == method))?;
        faults.remove(index).map(|(_, fault)| fault)
    }

    fn handle(&self, request: &RemoteRequest) -> RemoteResponse {
        let (path, query_string) = request
            .url
            .split_once('?')
            .unwrap_or((request.url.as_str(), ""));
        let Some((_, rest)) = path.split_once("/tables/") else {
            return error(404, "unknown route");
        };
        let mut segments = rest.splitn(2, '/');
        let table = decode(segments.next().unwrap_or_default());
        let id = segments.next().map(decode);

        match (request.method, id) {
            (Method::Post, None) => match body(request) {
                Some(item) => self.insert(&table, item),
                None => error(400, "body must be a JSON object"),
            },
            (Method::Patch, Some(id)) => match body(request) {
                Some(item) => self.update(&table, &id, item, request.header("If-Match")),
                None => error(400, "body must be a JSON object"),
            },
            (Method::Delete, Some(id)) => self.delete(&table, &id, request.header("If-Match")),
            (Method::Get, Some(id)) => match self.item(&table, &id) {
                Some(record) => RemoteResponse::json(200, &Value::Object(record)),
                None => error(404, "not found"),
            },
            (Method::Get, None) => self.query(&table, query_string),
            _ => error(405, "method not allowed"),
        }
    }

    fn insert(&self, table: &str, mut item: Record) -> RemoteResponse {
        let mut state = self.state.lock();
        let id = item_id(&item).unwrap_or_else(|| Uuid::new_v4().to_string());
        if let Some(existing) = state.tables.get(table).and_then(|rows| rows.get(&id)) {
            if !is_deleted(existing) {
                return RemoteResponse::json(409, &Value::Object(existing.clone()));
            }
        }

        item.retain(|k, _| !system::is_system_property(k));
        item.insert(ID_FIELD.into(), Value::String(id.clone()));
        let (tick, now) = state.tick();
        stamp(&mut item, tick, now, None);
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, item.clone());
        RemoteResponse::json(201, &Value::Object(item))
    }

    fn update(&self, table: &str, id: &str, item: Record, if_match: Option<&str>) -> RemoteResponse {
        let mut state = self.state.lock();
        let (tick, now) = state.tick();
        let Some(existing) = state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.get_mut(id))
            .filter(|r| !is_deleted(r))
        else {
            return error(404, "not found");
        };
        if !version_matches(existing, if_match) {
            return RemoteResponse::json(412, &Value::Object(existing.clone()));
        }

        for (key, value) in item {
            if !system::is_system_property(&key) && key != ID_FIELD {
                existing.insert(key, value);
            }
        }
        let created = existing.get(system::CREATED_AT).cloned();
        stamp(existing, tick, now, created);
        RemoteResponse::json(200, &Value::Object(existing.clone()))
    }

    fn delete(&self, table: &str, id: &str, if_match: Option<&str>) -> RemoteResponse {
        let mut state = self.state.lock();
        let (tick, now) = state.tick();
        let Some(existing) = state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.get_mut(id))
            .filter(|r| !is_deleted(r))
        else {
            return error(404, "not found");
        };
        if !version_matches(existing, if_match) {
            return RemoteResponse::json(412, &Value::Object(existing.clone()));
        }
        mark_deleted(existing, tick, now);
        RemoteResponse::new(204)
    }

    fn query(&self, table: &str, query_string: &str) -> RemoteResponse {
        let mut query = Query::new(table);
        for pair in query_string.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = decode(value);
            match decode(key).as_str() {
                "$filter" => match parse_filter(&value) {
                    Some(filters) => query.filters = filters,
                    None => return error(400, "unsupported $filter"),
                },
                "$orderby" => {
                    for clause in value.split(',') {
                        let mut words = clause.split_whitespace();
                        let Some(field) = words.next() else {
                            continue;
                        };
                        let direction = match words.next() {
                            Some("desc") => SortDirection::Descending,
                            _ => SortDirection::Ascending,
                        };
                        query = query.order_by(field, direction);
                    }
                }
                "$skip" => query.skip = value.parse().ok(),
                "$top" => query.top = value.parse().ok(),
                "$select" => query.select = value.split(',').map(str::to_string).collect(),
                "$inlinecount" => query.include_total_count = value == "allpages",
                "__includeDeleted" => query.include_deleted = value == "true",
                _ => {}
            }
        }

        let state = self.state.lock();
        let rows: Vec<&Record> = state
            .tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|r| query.include_deleted || !is_deleted(r))
                    .collect()
            })
            .unwrap_or_default();
        let results = query.apply(rows.iter().copied());

        if query.include_total_count {
            let count = rows.iter().filter(|r| query.matches(r)).count();
            RemoteResponse::json(200, &json!({ "results": results, "count": count }))
        } else {
            RemoteResponse::json(200, &Value::Array(results.into_iter().map(Value::Object).collect()))
        }
    }
}

#[async_trait]
impl Transport for FakeTableService {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, TransportError> {
        self.requests.lock().push(request.clone());
        match self.take_fault(request.method) {
            Some(Fault::Transport(e)) => Err(e),
            Some(Fault::Status(status)) => Ok(error(status, "injected failure")),
            None => Ok(self.handle(&request)),
        }
    }
}

/// Start of the service clock.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn stamp(record: &mut Record, tick: u64, now: DateTime<Utc>, created: Option<Value>) {
    let now = Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true));
    record.insert(system::VERSION.into(), Value::String(tick.to_string()));
    record.insert(system::CREATED_AT.into(), created.unwrap_or_else(|| now.clone()));
    record.insert(system::UPDATED_AT.into(), now);
}

fn mark_deleted(record: &mut Record, tick: u64, now: DateTime<Utc>) {
    record.insert(system::DELETED.into(), Value::Bool(true));
    let created = record.get(system::CREATED_AT).cloned();
    stamp(record, tick, now, created);
}

fn is_deleted(record: &Record) -> bool {
    record.get(system::DELETED).and_then(Value::as_bool).unwrap_or(false)
}

fn version_matches(record: &Record, if_match: Option<&str>) -> bool {
    match if_match {
        None => true,
        Some(expected) => record.get(system::VERSION).and_then(Value::as_str) == Some(expected.trim_matches('"')),
    }
}

fn body(request: &RemoteRequest) -> Option<Record> {
    match serde_json::from_str(request.body.as_deref()?) {
        Ok(Value::Object(record)) => Some(record),
        _ => None,
    }
}

fn decode(s: &str) -> String {
    urlencoding::decode(s).map(|c| c.into_owned()).unwrap_or_else(|_| s.to_string())
}

fn error(status: u16, message: &str) -> RemoteResponse {
    RemoteResponse::json(status, &json!({ "error": message }))
}

/// Parses `(field op literal) and (field op literal)`.
fn parse_filter(expr: &str) -> Option<Vec<Filter>> {
    let mut filters = Vec::new();
    let mut rest = expr.trim();
    loop {
        rest = rest.strip_prefix('(')?;
        let (field, after) = rest.split_once(' ')?;
        let (op, after) = after.split_once(' ')?;
        let op = FilterOp::parse(op)?;
        let (value, after) = parse_literal(after)?;
        rest = after.trim_start().strip_prefix(')')?.trim_start();
        filters.push(Filter::new(field, op, value));
        if rest.is_empty() {
            return Some(filters);
        }
        rest = rest.strip_prefix("and")?.trim_start();
    }
}

fn parse_literal(input: &str) -> Option<(Value, &str)> {
    let input = input.strip_prefix("datetimeoffset").unwrap_or(input);
    if let Some(quoted) = input.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = quoted.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c != '\'' {
                value.push(c);
            } else if matches!(chars.peek(), Some((_, '\''))) {
                chars.next();
                value.push('\'');
            } else {
                return Some((Value::String(value), &quoted[i + 1..]));
            }
        }
        return None;
    }
    let end = input.find(')').unwrap_or(input.len());
    let value = serde_json::from_str(input[..end].trim()).ok()?;
    Some((value, &input[end..]))
}
