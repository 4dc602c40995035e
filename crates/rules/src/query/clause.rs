//! Filter clauses of the bool query.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

/// One filter clause. Clauses that do not fit a typed form are kept raw.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Term { field: String, value: Value },
    Terms { field: String, values: Vec<Value> },
    Exists { field: String },
    Range { field: String, bounds: BTreeMap<String, Value> },
    Raw(Value),
}

impl Clause {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Clause::Term { field: field.into(), value: value.into() }
    }

    pub fn terms<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Clause::Terms {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Clause::Exists { field: field.into() }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Clause::Term { field, value } => json!({ "term": { field: value } }),
            Clause::Terms { field, values } => json!({ "terms": { field: values } }),
            Clause::Exists { field } => json!({ "exists": { "field": field } }),
            Clause::Range { field, bounds } => json!({ "range": { field: bounds } }),
            Clause::Raw(v) => v.clone(),
        }
    }

    /// Read a clause back from query DSL. Anything unrecognized stays [`Clause::Raw`].
    pub fn from_json(value: &Value) -> Self {
        typed(value).unwrap_or_else(|| Clause::Raw(value.clone()))
    }
}

fn single_entry(map: &Map<String, Value>) -> Option<(&String, &Value)> {
    if map.len() == 1 {
        map.iter().next()
    } else {
        None
    }
}

fn typed(value: &Value) -> Option<Clause> {
    let (kind, body) = single_entry(value.as_object()?)?;
    let body = body.as_object()?;
    match kind.as_str() {
        "term" => {
            let (field, v) = single_entry(body)?;
            if v.is_object() {
                return None;
            }
            Some(Clause::Term { field: field.clone(), value: v.clone() })
        }
        "terms" => {
            let (field, v) = single_entry(body)?;
            Some(Clause::Terms { field: field.clone(), values: v.as_array()?.clone() })
        }
        "exists" => {
            let (key, field) = single_entry(body)?;
            if key != "field" {
                return None;
            }
            Some(Clause::Exists { field: field.as_str()?.to_string() })
        }
        "range" => {
            let (field, bounds) = single_entry(body)?;
            let bounds = bounds
                .as_object()?
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Some(Clause::Range { field: field.clone(), bounds })
        }
        _ => None,
    }
}
