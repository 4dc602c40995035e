use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::Result;
use crate::query::{QueryDescriptor, SortOrder};
use crate::result::NormalizedResult;
use crate::rule::{
    outside_bounds, require_timeframe, HitsRule, MatchContext, MatchResult, QueryContext, Rule,
};
use crate::schema::{group_key, QueryKey, RuleCommon, RuleEnvelope, RuleType, Timeframe};
use crate::window::{is_expired, FirstSeen};

#[derive(Debug, Clone, Deserialize)]
struct CardinalityParams {
    cardinality_field: String,
    timeframe: Timeframe,
    #[serde(default)]
    max_cardinality: u64,
    #[serde(default)]
    min_cardinality: u64,
    #[serde(default)]
    query_key: Option<QueryKey>,
}

/// Tracks the distinct values of `cardinality_field` per key and triggers
/// when a key's distinct count leaves `[min_cardinality, max_cardinality]`.
///
/// A key's value set lives until its first-seen timestamp is more than
/// one timeframe old.
pub struct CardinalityRule {
    common: RuleCommon,
    params: CardinalityParams,
    values: HashMap<String, HashSet<String>>,
    first_seen: FirstSeen,
}

impl CardinalityRule {
    pub fn from_envelope(common: RuleCommon, env: &RuleEnvelope) -> Result<Self> {
        let params: CardinalityParams = env.params()?;
        let first_seen = FirstSeen::new(params.timeframe.duration());
        Ok(Self { common, params, values: HashMap::new(), first_seen })
    }

    /// Distinct values currently held for `key`.
    pub fn cardinality(&self, key: &str) -> usize {
        self.values.get(key).map(HashSet::len).unwrap_or(0)
    }

    /// Record one observation directly (used when replaying state).
    pub fn observe(&mut self, key: &str, value: &str, ts: DateTime<Utc>) {
        self.first_seen.observe(key, ts);
        self.values
            .entry(key.to_string())
            .or_default()
            .insert(value.to_string());
    }
}

impl Rule for CardinalityRule {
    fn common(&self) -> &RuleCommon {
        &self.common
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Cardinality
    }

    fn build_query(&self, ctx: &QueryContext) -> Result<QueryDescriptor> {
        let lookback = require_timeframe(&self.common, &self.params.timeframe)?;
        Ok(QueryDescriptor::for_rule(&self.common, ctx, ctx.now, lookback)
            .sort_by(self.common.timestamp_field.as_str(), SortOrder::Asc))
    }

    fn garbage_collect(&mut self, now: DateTime<Utc>) {
        let evicted = self.first_seen.garbage_collect(now);
        for key in &evicted {
            self.values.remove(key);
        }
        if !evicted.is_empty() {
            debug!(rule = %self.common.name, keys = evicted.len(), "evicted cardinality keys");
        }
    }
}

impl HitsRule for CardinalityRule {
    fn evaluate(&mut self, result: &NormalizedResult, now: DateTime<Utc>) -> Result<MatchResult> {
        let timeframe = self.params.timeframe.duration();
        let mut touched = BTreeSet::new();

        for hit in &result.hits {
            let ts = hit.timestamp(&self.common.timestamp_field).unwrap_or(now);
            if is_expired(ts, now, timeframe) {
                continue;
            }
            let Some(value) = hit.field_string(&self.params.cardinality_field) else {
                continue;
            };
            let key = group_key(self.params.query_key.as_ref(), hit);
            self.observe(&key, &value, ts);
            touched.insert(key);
        }

        for key in touched {
            let count = self.cardinality(&key) as u64;
            if outside_bounds(
                count as f64,
                self.params.min_cardinality as f64,
                self.params.max_cardinality as f64,
            ) {
                let mut terms: Vec<String> = self.values[&key].iter().cloned().collect();
                terms.sort();
                return Ok(MatchResult::triggered(MatchContext {
                    key: Some(key),
                    count: Some(count),
                    terms,
                    ..Default::default()
                }));
            }
        }
        Ok(MatchResult::quiet())
    }
}
