use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::Result;
use crate::query::QueryDescriptor;
use crate::result::NormalizedResult;
use crate::rule::{lookback_or_default, HitsRule, MatchContext, MatchResult, QueryContext, Rule};
use crate::schema::{RuleCommon, RuleEnvelope, RuleType, Timeframe};

#[derive(Debug, Clone, Deserialize)]
struct AnyParams {
    #[serde(default)]
    timeframe: Option<Timeframe>,
}

/// Triggers whenever the query returns at least one document.
pub struct AnyRule {
    common: RuleCommon,
    timeframe: Option<Timeframe>,
}

impl AnyRule {
    pub fn from_envelope(common: RuleCommon, env: &RuleEnvelope) -> Result<Self> {
        let p: AnyParams = env.params()?;
        Ok(Self { common, timeframe: p.timeframe })
    }
}

impl Rule for AnyRule {
    fn common(&self) -> &RuleCommon {
        &self.common
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Any
    }

    fn build_query(&self, ctx: &QueryContext) -> Result<QueryDescriptor> {
        let lookback = lookback_or_default(self.timeframe.as_ref(), ctx, ctx.now);
        Ok(QueryDescriptor::for_rule(&self.common, ctx, ctx.now, lookback))
    }
}

impl HitsRule for AnyRule {
    fn evaluate(&mut self, result: &NormalizedResult, _now: DateTime<Utc>) -> Result<MatchResult> {
        let count = result.hit_count();
        if count == 0 {
            return Ok(MatchResult::quiet());
        }
        Ok(MatchResult::triggered(MatchContext {
            count: Some(count),
            related: result.hits.iter().filter_map(|h| h.id().map(str::to_string)).collect(),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variants::test_support::*;

    #[test]
    fn triggers_iff_hits() {
        let mut rule = build("name: r\nindex: logs\ntype: any\n", AnyRule::from_envelope);

        assert!(!rule.evaluate(&hits_result(vec![]), now()).unwrap().triggered);

        let m = rule
            .evaluate(&hits_result(vec![hit("1", serde_json::json!({"msg": "x"}))]), now())
            .unwrap();
        assert!(m.triggered);
        assert_eq!(m.context.count, Some(1));
    }

    #[test]
    fn lookback_defaults_to_polling_interval() {
        let rule = build("name: r\nindex: logs\ntype: any\n", AnyRule::from_envelope);
        let q = rule.build_query(&ctx()).unwrap();
        let range = q.time_range.unwrap();
        assert_eq!(range.length(), ctx().default_lookback);
        assert_eq!(range.lt, now());
    }
}
