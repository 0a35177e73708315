//! Query model shared by local reads and remote table queries.
//!
//! A [`Query`] is a table name plus a conjunction of simple comparisons,
//! an ordering, paging and a projection. Local stores evaluate it with
//! [`Query::apply`]; the engine renders the same value into the remote
//! query string.

use crate::record::{Record, ID_FIELD};
use serde_json::Value;
use std::cmp::Ordering;

/// Comparison operator of a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
}

impl FilterOp {
    /// Returns the operator keyword used in remote filter expressions.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Ne => "ne",
            FilterOp::Gt => "gt",
            FilterOp::Ge => "ge",
            FilterOp::Lt => "lt",
            FilterOp::Le => "le",
        }
    }

    /// Parses an operator keyword.
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "eq" => Some(FilterOp::Eq),
            "ne" => Some(FilterOp::Ne),
            "gt" => Some(FilterOp::Gt),
            "ge" => Some(FilterOp::Ge),
            "lt" => Some(FilterOp::Lt),
            "le" => Some(FilterOp::Le),
            _ => None,
        }
    }

    fn accepts(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (FilterOp::Eq, Some(Ordering::Equal)) => true,
            (FilterOp::Ne, ordering) => ordering != Some(Ordering::Equal),
            (FilterOp::Gt, Some(Ordering::Greater)) => true,
            (FilterOp::Ge, Some(Ordering::Greater | Ordering::Equal)) => true,
            (FilterOp::Lt, Some(Ordering::Less)) => true,
            (FilterOp::Le, Some(Ordering::Less | Ordering::Equal)) => true,
            _ => false,
        }
    }
}

/// A single `field op value` comparison.
///
/// A missing field compares as `null`. Values of different JSON types
/// never compare equal, so only `ne` accepts them.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Property name.
    pub field: String,
    /// Comparison operator.
    pub op: FilterOp,
    /// Literal to compare against.
    pub value: Value,
}

impl Filter {
    /// Creates a new filter.
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Returns true if the record satisfies this comparison.
    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.field).unwrap_or(&Value::Null);
        self.op.accepts(compare_values(actual, &self.value))
    }
}

/// Sort direction of an [`OrderBy`] clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// One ordering clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Property name.
    pub field: String,
    /// Direction.
    pub direction: SortDirection,
}

/// A query over one table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// Table to query.
    pub table: String,
    /// Conjunction of comparisons.
    pub filters: Vec<Filter>,
    /// Ordering clauses, most significant first.
    pub order_by: Vec<OrderBy>,
    /// Number of matching records to skip.
    pub skip: Option<u64>,
    /// Maximum number of records to return.
    pub top: Option<u64>,
    /// Properties to return. Empty means all properties.
    pub select: Vec<String>,
    /// Ask the remote service for the total match count.
    pub include_total_count: bool,
    /// Ask the remote service to include soft-deleted records.
    pub include_deleted: bool,
}

impl Query {
    /// Creates a query selecting every record of `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Adds a comparison.
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::new(field, op, value));
        self
    }

    /// Adds an equality comparison.
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    /// Appends an ordering clause.
    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Sets the number of records to skip.
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Sets the maximum number of records to return.
    pub fn top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    /// Restricts the returned properties. `id` is always returned.
    pub fn select<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Requests the total match count from the remote service.
    pub fn include_total_count(mut self) -> Self {
        self.include_total_count = true;
        self
    }

    /// Requests soft-deleted records from the remote service.
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Returns true if the query covers the whole table.
    pub fn is_whole_table(&self) -> bool {
        self.filters.is_empty() && self.skip.is_none() && self.top.is_none()
    }

    /// Returns true if the record satisfies every filter.
    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }

    /// Evaluates the query over `records`.
    ///
    /// Filters first, then orders (stable, so input order breaks ties),
    /// then skips, takes and projects.
    pub fn apply<'a, I>(&self, records: I) -> Vec<Record>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut rows: Vec<&Record> = records.into_iter().filter(|r| self.matches(r)).collect();
        if !self.order_by.is_empty() {
            rows.sort_by(|a, b| self.compare(a, b));
        }

        let skip = self.skip.unwrap_or(0) as usize;
        let top = self.top.map_or(usize::MAX, |t| t as usize);
        rows.into_iter()
            .skip(skip)
            .take(top)
            .map(|r| self.project(r))
            .collect()
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for clause in &self.order_by {
            let left = a.get(&clause.field).unwrap_or(&Value::Null);
            let right = b.get(&clause.field).unwrap_or(&Value::Null);
            let ordering = compare_values(left, right)
                .unwrap_or_else(|| type_rank(left).cmp(&type_rank(right)));
            let ordering = match clause.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    fn project(&self, record: &Record) -> Record {
        if self.select.is_empty() {
            return record.clone();
        }
        record
            .iter()
            .filter(|(k, _)| k.as_str() == ID_FIELD || self.select.iter().any(|s| s == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (x, y) if x == y => Some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
