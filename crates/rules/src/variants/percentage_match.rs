use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::query::{Aggregation, Clause, QueryDescriptor};
use crate::result::NormalizedResult;
use crate::rule::{
    lookback_or_default, outside_bounds, AggregationRule, MatchContext, MatchResult, QueryContext,
    Rule,
};
use crate::schema::{RuleCommon, RuleEnvelope, RuleType, Timeframe};

const TOTAL_AGG: &str = "total_documents";
const MATCHING_AGG: &str = "matching_documents";

/// Query DSL clause kinds accepted as a single-clause `match_bucket_filter`.
const CLAUSE_KINDS: &[&str] = &[
    "term", "terms", "range", "exists", "bool", "match", "match_phrase", "prefix", "wildcard",
    "query_string",
];

#[derive(Debug, Clone, Deserialize)]
struct PercentageMatchParams {
    match_bucket_filter: Value,
    #[serde(default)]
    min_percentage: f64,
    #[serde(default)]
    max_percentage: f64,
    #[serde(default)]
    timeframe: Option<Timeframe>,
    #[serde(default)]
    percentage_precision: Option<usize>,
}

/// Share of documents matching `match_bucket_filter`; triggers outside
/// `[min_percentage, max_percentage]`. A window without documents is quiet.
pub struct PercentageMatchRule {
    common: RuleCommon,
    params: PercentageMatchParams,
    bucket_filter: Vec<Value>,
}

/// Accepts a list of clauses, a single clause, or a bare `{field: value}`
/// map (read as a `term` clause).
fn bucket_clauses(filter: &Value) -> Vec<Value> {
    match filter {
        Value::Array(items) => items.clone(),
        Value::Object(map)
            if map.len() == 1 && map.keys().all(|k| CLAUSE_KINDS.contains(&k.as_str())) =>
        {
            vec![filter.clone()]
        }
        Value::Object(map) => map
            .iter()
            .map(|(field, value)| json!({ "term": { field: value } }))
            .collect(),
        _ => Vec::new(),
    }
}

impl PercentageMatchRule {
    pub fn from_envelope(common: RuleCommon, env: &RuleEnvelope) -> Result<Self> {
        let params: PercentageMatchParams = env.params()?;
        let bucket_filter = bucket_clauses(&params.match_bucket_filter);
        if bucket_filter.is_empty() {
            return Err(crate::error::RuleError::decode(
                &common.name,
                "match_bucket_filter must contain at least one clause",
            ));
        }
        Ok(Self { common, params, bucket_filter })
    }

    fn round(&self, pct: f64) -> f64 {
        match self.params.percentage_precision {
            Some(p) => {
                let factor = 10f64.powi(p as i32);
                (pct * factor).round() / factor
            }
            None => pct,
        }
    }
}

impl Rule for PercentageMatchRule {
    fn common(&self) -> &RuleCommon {
        &self.common
    }

    fn rule_type(&self) -> RuleType {
        RuleType::PercentageMatch
    }

    fn build_query(&self, ctx: &QueryContext) -> Result<QueryDescriptor> {
        let lookback = lookback_or_default(self.params.timeframe.as_ref(), ctx, ctx.now);
        let matching = Clause::Raw(json!({ "bool": { "filter": self.bucket_filter } }));
        Ok(QueryDescriptor::for_rule(&self.common, ctx, ctx.now, lookback)
            .size(0)
            .aggregate(TOTAL_AGG, Aggregation::filter(Clause::Raw(json!({ "match_all": {} }))))
            .aggregate(MATCHING_AGG, Aggregation::filter(matching)))
    }
}

impl AggregationRule for PercentageMatchRule {
    fn evaluate_aggregations(
        &mut self,
        result: &NormalizedResult,
        _now: DateTime<Utc>,
    ) -> Result<MatchResult> {
        let total = result.aggregation(TOTAL_AGG)?.doc_count()?;
        let matching = result.aggregation(MATCHING_AGG)?.doc_count()?;
        if total == 0 {
            return Ok(MatchResult::quiet());
        }

        let pct = self.round(matching as f64 / total as f64 * 100.0);
        if !outside_bounds(pct, self.params.min_percentage, self.params.max_percentage) {
            return Ok(MatchResult::quiet());
        }
        Ok(MatchResult::triggered(MatchContext {
            count: Some(matching),
            percentage: Some(pct),
            ..Default::default()
        }))
    }
}
