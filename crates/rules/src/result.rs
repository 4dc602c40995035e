//! Uniform view over a raw search response: ordered hits, total count and
//! the aggregation tree.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{Result, RuleError};

/// One matched document as returned by the backend (`_id`, `_source`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct Hit(Value);

impl Hit {
    pub fn new(raw: Value) -> Self {
        Hit(raw)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get("_id").and_then(Value::as_str)
    }

    /// Identity used to recognize a document across overlapping polls:
    /// `_id` when present, otherwise a SHA-256 hex digest of the body.
    pub fn dedup_key(&self) -> String {
        if let Some(id) = self.id() {
            return id.to_string();
        }
        let digest = Sha256::digest(self.source().to_string().as_bytes());
        format!("sha256:{digest:x}")
    }

    /// The document body; hits without `_source` are treated as the body itself.
    pub fn source(&self) -> &Value {
        self.0.get("_source").unwrap_or(&self.0)
    }

    /// Look up a field in the document body. A literal dotted key
    /// (`"user.name": ..`) wins over a nested path (`user: {name: ..}`).
    pub fn field(&self, path: &str) -> Option<&Value> {
        let source = self.source();
        if let Some(v) = source.get(path) {
            return Some(v);
        }
        path.split('.').try_fold(source, |cur, part| cur.get(part))
    }

    /// Field value rendered as a string. Strings, numbers and booleans
    /// qualify; null, arrays and objects do not.
    pub fn field_string(&self, path: &str) -> Option<String> {
        scalar_string(self.field(path)?)
    }

    /// Every scalar value of a field: one for a scalar field, one per
    /// scalar element for an array field. Empty when missing or null.
    pub fn field_strings(&self, path: &str) -> Vec<String> {
        match self.field(path) {
            Some(Value::Array(items)) => items.iter().filter_map(scalar_string).collect(),
            Some(v) => scalar_string(v).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Parse an RFC 3339 timestamp or epoch-millis field.
    pub fn timestamp(&self, path: &str) -> Option<DateTime<Utc>> {
        match self.field(path)? {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
            _ => None,
        }
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Backend response reduced to the parts rule evaluation reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedResult {
    pub hits: Vec<Hit>,
    pub total: Option<u64>,
    pub aggregations: Option<Map<String, Value>>,
}

impl NormalizedResult {
    /// Number of matching documents: the reported total when present,
    /// otherwise the number of returned hits.
    pub fn hit_count(&self) -> u64 {
        self.total
            .unwrap_or(self.hits.len() as u64)
            .max(self.hits.len() as u64)
    }

    /// Named top-level aggregation.
    pub fn aggregation(&self, name: &str) -> Result<AggNode<'_>> {
        let aggs = self
            .aggregations
            .as_ref()
            .ok_or_else(|| RuleError::parse("response has no aggregations"))?;
        aggs.get(name)
            .map(AggNode)
            .ok_or_else(|| RuleError::parse(format!("missing aggregation '{}'", name)))
    }
}

/// Convert a raw search response into a [`NormalizedResult`].
pub fn normalize(response: &Value) -> Result<NormalizedResult> {
    let hits_obj = response
        .get("hits")
        .ok_or_else(|| RuleError::parse("missing 'hits'"))?;
    let hits = hits_obj
        .get("hits")
        .and_then(Value::as_array)
        .ok_or_else(|| RuleError::parse("'hits.hits' is not an array"))?
        .iter()
        .map(|h| {
            if h.is_object() {
                Ok(Hit::new(h.clone()))
            } else {
                Err(RuleError::parse("hit is not an object"))
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let total = match hits_obj.get("total") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_u64(),
        Some(obj @ Value::Object(_)) => Some(
            obj.get("value")
                .and_then(Value::as_u64)
                .ok_or_else(|| RuleError::parse("'hits.total.value' is not a number"))?,
        ),
        Some(_) => return Err(RuleError::parse("'hits.total' has an unexpected shape")),
    };

    let aggregations = match response.get("aggregations") {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => return Err(RuleError::parse("'aggregations' is not an object")),
    };

    Ok(NormalizedResult { hits, total, aggregations })
}

/// A node of the aggregation tree: either an aggregation or a bucket.
#[derive(Debug, Clone, Copy)]
pub struct AggNode<'a>(&'a Value);

impl<'a> AggNode<'a> {
    pub fn raw(&self) -> &'a Value {
        self.0
    }

    pub fn buckets(&self) -> Result<Vec<AggNode<'a>>> {
        self.0
            .get("buckets")
            .and_then(Value::as_array)
            .map(|b| b.iter().map(AggNode).collect())
            .ok_or_else(|| RuleError::parse("aggregation has no 'buckets' array"))
    }

    pub fn doc_count(&self) -> Result<u64> {
        self.0
            .get("doc_count")
            .and_then(Value::as_u64)
            .ok_or_else(|| RuleError::parse("node has no 'doc_count'"))
    }

    /// Bucket key as a string (`key_as_string` preferred for date buckets).
    pub fn key(&self) -> Result<String> {
        if let Some(s) = self.0.get("key_as_string").and_then(Value::as_str) {
            return Ok(s.to_string());
        }
        match self.0.get("key") {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::Bool(b)) => Ok(b.to_string()),
            _ => Err(RuleError::parse("bucket has no usable 'key'")),
        }
    }

    pub fn sub(&self, name: &str) -> Result<AggNode<'a>> {
        self.0
            .get(name)
            .map(AggNode)
            .ok_or_else(|| RuleError::parse(format!("missing sub-aggregation '{}'", name)))
    }

    /// Single metric value; `None` when the backend reports `null`.
    pub fn value(&self) -> Result<Option<f64>> {
        match self.0.get("value") {
            Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| RuleError::parse("metric 'value' is not a number")),
            None => Err(RuleError::parse("metric has no 'value'")),
        }
    }

    /// First value of a percentiles aggregation (`values: {"95.0": x}`).
    pub fn percentile_value(&self) -> Result<Option<f64>> {
        let values = self
            .0
            .get("values")
            .ok_or_else(|| RuleError::parse("percentiles has no 'values'"))?;
        let first = match values {
            Value::Object(map) => map.values().next(),
            Value::Array(items) => items.first().and_then(|i| i.get("value")),
            _ => return Err(RuleError::parse("percentiles 'values' has an unexpected shape")),
        };
        Ok(first.and_then(Value::as_f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_hits_total_and_aggregations() {
        let raw = json!({
            "took": 3,
            "hits": {
                "total": {"value": 42, "relation": "eq"},
                "hits": [
                    {"_id": "a", "_source": {"user": {"name": "bob"}, "@timestamp": "2024-05-01T10:00:00Z"}},
                    {"_id": "b", "_source": {"user.name": "eve", "@timestamp": 1714557600000i64}}
                ]
            },
            "aggregations": {
                "by_user": {"buckets": [{"key": "bob", "doc_count": 3}]},
                "p": {"values": {"95.0": 12.5}}
            }
        });

        let result = normalize(&raw).unwrap();
        assert_eq!(result.hits.len(), 2);
        assert_eq!(result.total, Some(42));
        assert_eq!(result.hit_count(), 42);

        assert_eq!(result.hits[0].id(), Some("a"));
        assert_eq!(result.hits[0].field_string("user.name").as_deref(), Some("bob"));
        assert_eq!(result.hits[1].field_string("user.name").as_deref(), Some("eve"));
        assert_eq!(
            result.hits[0].timestamp("@timestamp"),
            Some("2024-05-01T10:00:00Z".parse().unwrap())
        );
        assert_eq!(
            result.hits[1].timestamp("@timestamp"),
            DateTime::from_timestamp_millis(1714557600000)
        );

        let buckets = result.aggregation("by_user").unwrap().buckets().unwrap();
        assert_eq!(buckets[0].key().unwrap(), "bob");
        assert_eq!(buckets[0].doc_count().unwrap(), 3);
        assert_eq!(result.aggregation("p").unwrap().percentile_value().unwrap(), Some(12.5));
    }

    #[test]
    fn legacy_numeric_total() {
        let result = normalize(&json!({"hits": {"total": 7, "hits": []}})).unwrap();
        assert_eq!(result.total, Some(7));
        assert!(result.aggregations.is_none());
    }

    #[test]
    fn unexpected_shapes_are_parse_errors() {
        for raw in [
            json!({}),
            json!({"hits": {"hits": {}}}),
            json!({"hits": {"hits": [1, 2]}}),
            json!({"hits": {"hits": [], "total": "many"}}),
            json!({"hits": {"hits": []}, "aggregations": []}),
        ] {
            assert!(
                matches!(normalize(&raw), Err(RuleError::ResponseParse(_))),
                "expected parse error for {raw}"
            );
        }
    }

    #[test]
    fn accessor_shape_errors() {
        let result = normalize(&json!({
            "hits": {"hits": []},
            "aggregations": {"m": {"value": null}, "bad": {"value": "x"}}
        }))
        .unwrap();
        assert_eq!(result.aggregation("m").unwrap().value().unwrap(), None);
        assert!(result.aggregation("bad").unwrap().value().is_err());
        assert!(result.aggregation("m").unwrap().buckets().is_err());
        assert!(result.aggregation("nope").is_err());
    }

    #[test]
    fn field_strings_flattens_arrays() {
        let hit = Hit::new(json!({"_source": {"tags": ["a", 2, null, {"x": 1}], "one": "b", "none": null}}));
        assert_eq!(hit.field_strings("tags"), vec!["a", "2"]);
        assert_eq!(hit.field_strings("one"), vec!["b"]);
        assert!(hit.field_strings("none").is_empty());
        assert!(hit.field_strings("absent").is_empty());
        assert_eq!(hit.field_string("tags"), None);
    }

    #[test]
    fn dedup_key_is_stable_without_id() {
        let with_id = Hit::new(json!({"_id": "a", "_source": {"x": 1}}));
        assert_eq!(with_id.dedup_key(), "a");

        let first = Hit::new(json!({"_source": {"host": "web-1", "@timestamp": "2024-05-01T10:00:00Z"}}));
        let again = Hit::new(json!({"_source": {"@timestamp": "2024-05-01T10:00:00Z", "host": "web-1"}}));
        let other = Hit::new(json!({"_source": {"host": "web-2", "@timestamp": "2024-05-01T10:00:00Z"}}));
        assert_eq!(first.dedup_key(), again.dedup_key());
        assert_ne!(first.dedup_key(), other.dedup_key());
        assert!(first.dedup_key().starts_with("sha256:"));
    }
}
