//! Declarative search requests built by rules each cycle.
//!
//! A [`QueryDescriptor`] serializes to the backend's JSON search body with
//! [`QueryDescriptor::to_body`] and reads back with
//! [`QueryDescriptor::from_body`], so a built query can be inspected and
//! transformed (e.g. shifted to the previous window) structurally.

mod aggregation;
mod clause;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::error::{Result, RuleError};
use crate::rule::QueryContext;
use crate::schema::RuleCommon;

pub use aggregation::{Aggregation, Aggs, MetricKind};
pub use clause::Clause;

use aggregation::{aggs_from_json, aggs_to_json};

/// Marker written into the time-range clause so it can be told apart from
/// ordinary range filters when a body is read back.
const TIME_RANGE_FORMAT: &str = "strict_date_optional_time";

/// Half-open time window `[gte, lt)` on a timestamp field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRange {
    pub field: String,
    pub gte: DateTime<Utc>,
    pub lt: DateTime<Utc>,
}

impl TimeRange {
    /// The window of length `lookback` ending at `end`.
    pub fn ending_at(field: impl Into<String>, end: DateTime<Utc>, lookback: Duration) -> Self {
        Self { field: field.into(), gte: end - lookback, lt: end }
    }

    pub fn length(&self) -> Duration {
        self.lt - self.gte
    }

    /// The adjacent, non-overlapping window of equal length just before this one.
    pub fn previous(&self) -> Self {
        Self {
            field: self.field.clone(),
            gte: self.gte - self.length(),
            lt: self.gte,
        }
    }

    fn to_json(&self) -> Value {
        json!({ "range": { &self.field: {
            "gte": self.gte.to_rfc3339_opts(SecondsFormat::Millis, true),
            "lt": self.lt.to_rfc3339_opts(SecondsFormat::Millis, true),
            "format": TIME_RANGE_FORMAT
        } } })
    }

    fn from_json(value: &Value) -> Option<Self> {
        let range = value.get("range")?.as_object()?;
        if range.len() != 1 {
            return None;
        }
        let (field, bounds) = range.iter().next()?;
        if bounds.get("format")?.as_str()? != TIME_RANGE_FORMAT {
            return None;
        }
        let parse = |key: &str| {
            bounds
                .get(key)
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
        };
        Some(Self { field: field.clone(), gte: parse("gte")?, lt: parse("lt")? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

/// A backend search request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub index: String,
    pub time_range: Option<TimeRange>,
    pub filters: Vec<Clause>,
    pub must_not: Vec<Clause>,
    pub aggregations: Aggs,
    pub sort: Option<Sort>,
    pub size: usize,
}

impl QueryDescriptor {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            time_range: None,
            filters: Vec::new(),
            must_not: Vec::new(),
            aggregations: Aggs::new(),
            sort: None,
            size: 0,
        }
    }

    /// Base query for a rule: its index, the window of length `lookback`
    /// ending at `end`, the rule's configured filters, and `max_hits`
    /// as the result size.
    pub fn for_rule(
        common: &RuleCommon,
        ctx: &QueryContext,
        end: DateTime<Utc>,
        lookback: Duration,
    ) -> Self {
        let mut q = Self::new(&common.index);
        q.time_range = Some(TimeRange::ending_at(&common.timestamp_field, end, lookback));
        q.filters = common.filter.iter().map(Clause::from_json).collect();
        q.size = ctx.max_hits;
        q
    }

    pub fn filter(mut self, clause: Clause) -> Self {
        self.filters.push(clause);
        self
    }

    pub fn exclude(mut self, clause: Clause) -> Self {
        self.must_not.push(clause);
        self
    }

    pub fn aggregate(mut self, name: impl Into<String>, agg: Aggregation) -> Self {
        self.aggregations.insert(name.into(), agg);
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(Sort { field: field.into(), order });
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Same query over the adjacent earlier window of equal length.
    /// Every other clause is kept unchanged.
    pub fn shifted_to_previous(&self) -> Self {
        let mut q = self.clone();
        q.time_range = self.time_range.as_ref().map(TimeRange::previous);
        q
    }

    /// Serialize to the backend's JSON search body.
    pub fn to_body(&self) -> Value {
        let mut filter: Vec<Value> = Vec::with_capacity(self.filters.len() + 1);
        if let Some(range) = &self.time_range {
            filter.push(range.to_json());
        }
        filter.extend(self.filters.iter().map(Clause::to_json));

        let mut bool_query = Map::new();
        bool_query.insert("filter".to_string(), Value::Array(filter));
        if !self.must_not.is_empty() {
            bool_query.insert(
                "must_not".to_string(),
                Value::Array(self.must_not.iter().map(Clause::to_json).collect()),
            );
        }

        let mut body = Map::new();
        body.insert("size".to_string(), json!(self.size));
        body.insert("query".to_string(), json!({ "bool": bool_query }));
        if !self.aggregations.is_empty() {
            body.insert("aggs".to_string(), aggs_to_json(&self.aggregations));
        }
        if let Some(sort) = &self.sort {
            let order = match sort.order {
                SortOrder::Asc => "asc",
                SortOrder::Desc => "desc",
            };
            body.insert(
                "sort".to_string(),
                json!([{ &sort.field: { "order": order } }]),
            );
        }
        Value::Object(body)
    }

    /// Read a search body produced by [`to_body`](Self::to_body) back into a descriptor.
    pub fn from_body(index: impl Into<String>, body: &Value) -> Result<Self> {
        let invalid = |msg: &str| RuleError::InvalidQuery(msg.to_string());

        let mut q = Self::new(index);
        q.size = body
            .get("size")
            .and_then(Value::as_u64)
            .ok_or_else(|| invalid("missing 'size'"))? as usize;

        let bool_query = body
            .pointer("/query/bool")
            .ok_or_else(|| invalid("missing 'query.bool'"))?;
        if let Some(filters) = bool_query.get("filter") {
            for f in filters.as_array().ok_or_else(|| invalid("'filter' is not an array"))? {
                match TimeRange::from_json(f) {
                    Some(range) if q.time_range.is_none() => q.time_range = Some(range),
                    _ => q.filters.push(Clause::from_json(f)),
                }
            }
        }
        if let Some(must_not) = bool_query.get("must_not") {
            q.must_not = must_not
                .as_array()
                .ok_or_else(|| invalid("'must_not' is not an array"))?
                .iter()
                .map(Clause::from_json)
                .collect();
        }

        if let Some(aggs) = body.get("aggs").or_else(|| body.get("aggregations")) {
            q.aggregations = aggs_from_json(aggs).map_err(RuleError::InvalidQuery)?;
        }

        if let Some(sort) = body.get("sort") {
            let (field, spec) = sort
                .as_array()
                .and_then(|s| s.first())
                .and_then(Value::as_object)
                .and_then(|o| o.iter().next())
                .ok_or_else(|| invalid("'sort' has an unexpected shape"))?;
            let order = match spec.get("order").and_then(Value::as_str) {
                Some("desc") => SortOrder::Desc,
                _ => SortOrder::Asc,
            };
            q.sort = Some(Sort { field: field.clone(), order });
        }

        Ok(q)
    }
}
