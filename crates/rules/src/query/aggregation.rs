//! Aggregation requests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::Clause;

/// Named aggregations, serialized under `aggs`.
pub type Aggs = BTreeMap<String, Aggregation>;

/// Single-value metric aggregations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Min,
    Max,
    Avg,
    Sum,
    Cardinality,
    ValueCount,
}

impl MetricKind {
    const ALL: [MetricKind; 6] = [
        MetricKind::Min,
        MetricKind::Max,
        MetricKind::Avg,
        MetricKind::Sum,
        MetricKind::Cardinality,
        MetricKind::ValueCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Min => "min",
            MetricKind::Max => "max",
            MetricKind::Avg => "avg",
            MetricKind::Sum => "sum",
            MetricKind::Cardinality => "cardinality",
            MetricKind::ValueCount => "value_count",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Terms { field: String, size: usize, aggs: Aggs },
    Metric { kind: MetricKind, field: String },
    Percentiles { field: String, percents: Vec<f64> },
    DateHistogram { field: String, fixed_interval: String, aggs: Aggs },
    Filter { clause: Clause, aggs: Aggs },
}

impl Aggregation {
    pub fn terms(field: impl Into<String>, size: usize) -> Self {
        Aggregation::Terms { field: field.into(), size, aggs: Aggs::new() }
    }

    pub fn metric(kind: MetricKind, field: impl Into<String>) -> Self {
        Aggregation::Metric { kind, field: field.into() }
    }

    pub fn filter(clause: Clause) -> Self {
        Aggregation::Filter { clause, aggs: Aggs::new() }
    }

    /// Attach a sub-aggregation. Metric aggregations cannot carry children
    /// and are returned unchanged.
    pub fn with_sub(mut self, name: impl Into<String>, sub: Aggregation) -> Self {
        match &mut self {
            Aggregation::Terms { aggs, .. }
            | Aggregation::DateHistogram { aggs, .. }
            | Aggregation::Filter { aggs, .. } => {
                aggs.insert(name.into(), sub);
            }
            Aggregation::Metric { .. } | Aggregation::Percentiles { .. } => {}
        }
        self
    }

    pub fn to_json(&self) -> Value {
        let (mut body, aggs) = match self {
            Aggregation::Terms { field, size, aggs } => {
                (json!({ "terms": { "field": field, "size": size } }), Some(aggs))
            }
            Aggregation::Metric { kind, field } => {
                (json!({ kind.as_str(): { "field": field } }), None)
            }
            Aggregation::Percentiles { field, percents } => (
                json!({ "percentiles": { "field": field, "percents": percents } }),
                None,
            ),
            Aggregation::DateHistogram { field, fixed_interval, aggs } => (
                json!({ "date_histogram": {
                    "field": field,
                    "fixed_interval": fixed_interval,
                    "min_doc_count": 0
                } }),
                Some(aggs),
            ),
            Aggregation::Filter { clause, aggs } => {
                (json!({ "filter": clause.to_json() }), Some(aggs))
            }
        };
        if let (Some(aggs), Value::Object(map)) = (aggs, &mut body) {
            if !aggs.is_empty() {
                map.insert("aggs".to_string(), aggs_to_json(aggs));
            }
        }
        body
    }

    pub fn from_json(value: &Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "aggregation must be an object".to_string())?;
        let aggs = match obj.get("aggs").or_else(|| obj.get("aggregations")) {
            Some(v) => aggs_from_json(v)?,
            None => Aggs::new(),
        };
        let mut kinds = obj
            .iter()
            .filter(|(k, _)| k.as_str() != "aggs" && k.as_str() != "aggregations");
        let (kind, body) = match (kinds.next(), kinds.next()) {
            (Some(entry), None) => entry,
            _ => return Err("aggregation must have exactly one type".to_string()),
        };

        let field = || -> Result<String, String> {
            body.get("field")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| format!("'{}' aggregation has no field", kind))
        };

        match kind.as_str() {
            "terms" => Ok(Aggregation::Terms {
                field: field()?,
                size: body.get("size").and_then(Value::as_u64).unwrap_or(10) as usize,
                aggs,
            }),
            "percentiles" => Ok(Aggregation::Percentiles {
                field: field()?,
                percents: body
                    .get("percents")
                    .and_then(Value::as_array)
                    .map(|p| p.iter().filter_map(Value::as_f64).collect())
                    .unwrap_or_default(),
            }),
            "date_histogram" => Ok(Aggregation::DateHistogram {
                field: field()?,
                fixed_interval: body
                    .get("fixed_interval")
                    .or_else(|| body.get("interval"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| "date_histogram has no interval".to_string())?
                    .to_string(),
                aggs,
            }),
            "filter" => Ok(Aggregation::Filter { clause: Clause::from_json(body), aggs }),
            other => match MetricKind::from_name(other) {
                Some(kind) => Ok(Aggregation::Metric { kind, field: field()? }),
                None => Err(format!("unsupported aggregation type '{}'", other)),
            },
        }
    }
}

pub(crate) fn aggs_to_json(aggs: &Aggs) -> Value {
    Value::Object(
        aggs.iter()
            .map(|(name, agg)| (name.clone(), agg.to_json()))
            .collect::<Map<_, _>>(),
    )
}

pub(crate) fn aggs_from_json(value: &Value) -> Result<Aggs, String> {
    value
        .as_object()
        .ok_or_else(|| "'aggs' must be an object".to_string())?
        .iter()
        .map(|(name, v)| Ok((name.clone(), Aggregation::from_json(v)?)))
        .collect()
}
