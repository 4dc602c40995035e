use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, RuleError};
use crate::query::{QueryDescriptor, SortOrder};
use crate::result::{Hit, NormalizedResult};
use crate::rule::{lookback_or_default, HitsRule, MatchContext, MatchResult, QueryContext, Rule};
use crate::schema::{QueryKey, RuleCommon, RuleEnvelope, RuleType, Timeframe};
use crate::window::is_expired;

#[derive(Debug, Clone, Deserialize)]
struct ChangeParams {
    query_key: QueryKey,
    #[serde(default)]
    compare_key: Option<String>,
    #[serde(default)]
    compound_compare_key: Vec<String>,
    #[serde(default)]
    ignore_null: bool,
    #[serde(default)]
    timeframe: Timeframe,
}

#[derive(Debug, Clone)]
struct Baseline {
    values: Vec<Option<String>>,
    seen_at: DateTime<Utc>,
}

/// Triggers when a key's compare value differs from its last recorded
/// value and the previous observation is no older than the timeframe.
///
/// Every observation becomes the key's new baseline, flagged or not.
pub struct ChangeRule {
    common: RuleCommon,
    params: ChangeParams,
    compare_fields: Vec<String>,
    baselines: HashMap<String, Baseline>,
}

impl ChangeRule {
    pub fn from_envelope(common: RuleCommon, env: &RuleEnvelope) -> Result<Self> {
        let params: ChangeParams = env.params()?;
        let compare_fields = if params.compound_compare_key.is_empty() {
            params.compare_key.iter().cloned().collect::<Vec<_>>()
        } else {
            params.compound_compare_key.clone()
        };
        if compare_fields.is_empty() {
            return Err(RuleError::decode(
                &common.name,
                "change rule needs compare_key or compound_compare_key",
            ));
        }
        Ok(Self { common, params, compare_fields, baselines: HashMap::new() })
    }

    fn compare_values(&self, hit: &Hit) -> Vec<Option<String>> {
        self.compare_fields.iter().map(|f| hit.field_string(f)).collect()
    }

    /// Number of keys with a recorded baseline.
    pub fn baseline_count(&self) -> usize {
        self.baselines.len()
    }
}

fn render(values: &[Option<String>]) -> String {
    values
        .iter()
        .map(|v| v.as_deref().unwrap_or("null"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Rule for ChangeRule {
    fn common(&self) -> &RuleCommon {
        &self.common
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Change
    }

    fn build_query(&self, ctx: &QueryContext) -> Result<QueryDescriptor> {
        let lookback = lookback_or_default(Some(&self.params.timeframe), ctx, ctx.now);
        Ok(QueryDescriptor::for_rule(&self.common, ctx, ctx.now, lookback)
            .sort_by(self.common.timestamp_field.as_str(), SortOrder::Asc))
    }

    /// A baseline older than the timeframe can no longer flag a change; the
    /// key's next observation starts a fresh one either way.
    fn garbage_collect(&mut self, now: DateTime<Utc>) {
        let timeframe = self.params.timeframe.duration();
        let before = self.baselines.len();
        self.baselines.retain(|_, b| !is_expired(b.seen_at, now, timeframe));
        let removed = before - self.baselines.len();
        if removed > 0 {
            debug!(rule = %self.common.name, removed, "expired change baselines");
        }
    }
}

impl HitsRule for ChangeRule {
    fn evaluate(&mut self, result: &NormalizedResult, now: DateTime<Utc>) -> Result<MatchResult> {
        let timeframe = self.params.timeframe.duration();
        let mut outcome = MatchResult::quiet();

        for hit in &result.hits {
            let Some(key) = self.params.query_key.value_for(hit) else {
                continue;
            };
            let values = self.compare_values(hit);
            if self.params.ignore_null && values.iter().any(Option::is_none) {
                continue;
            }
            let ts = hit.timestamp(&self.common.timestamp_field).unwrap_or(now);

            if let Some(prev) = self.baselines.get(&key) {
                // Overlapping polls return documents already recorded.
                if ts <= prev.seen_at {
                    continue;
                }
                if prev.values != values && ts - prev.seen_at <= timeframe {
                    outcome = MatchResult::triggered(MatchContext {
                        key: Some(key.clone()),
                        previous: Some(render(&prev.values)),
                        current: Some(render(&values)),
                        ..Default::default()
                    });
                }
            }
            self.baselines.insert(key, Baseline { values, seen_at: ts });
        }

        Ok(outcome)
    }
}
