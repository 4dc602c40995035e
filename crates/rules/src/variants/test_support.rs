//! Fixtures shared by the rule-type tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};

use crate::error::Result;
use crate::result::{normalize, Hit, NormalizedResult};
use crate::rule::QueryContext;
use crate::schema::{RuleCommon, RuleEnvelope};

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn ctx() -> QueryContext {
    QueryContext {
        now: now(),
        buffer_time: Duration::minutes(15),
        default_lookback: Duration::minutes(1),
        max_hits: 1000,
        since: None,
    }
}

pub fn build<R>(yaml: &str, ctor: fn(RuleCommon, &RuleEnvelope) -> Result<R>) -> R {
    let env = RuleEnvelope::parse(yaml).unwrap();
    ctor(env.common().unwrap(), &env).unwrap()
}

pub fn hit(id: &str, source: Value) -> Hit {
    Hit::new(json!({ "_id": id, "_source": source }))
}

/// A hit whose `@timestamp` is `at`.
pub fn hit_at(id: &str, at: DateTime<Utc>, mut source: Value) -> Hit {
    source["@timestamp"] = json!(at.to_rfc3339());
    hit(id, source)
}

pub fn hits_result(hits: Vec<Hit>) -> NormalizedResult {
    NormalizedResult { hits, ..Default::default() }
}

pub fn agg_result(aggregations: Value) -> NormalizedResult {
    normalize(&json!({ "hits": { "hits": [] }, "aggregations": aggregations })).unwrap()
}
