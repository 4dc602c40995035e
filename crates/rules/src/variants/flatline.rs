use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::Result;
use crate::query::{QueryDescriptor, SortOrder};
use crate::result::NormalizedResult;
use crate::rule::{require_timeframe, HitsRule, MatchContext, MatchResult, QueryContext, Rule};
use crate::schema::{RuleCommon, RuleEnvelope, RuleType, Timeframe};
use crate::window::{is_expired, EventWindow, SeenIds};

#[derive(Debug, Clone, Deserialize)]
struct FlatlineParams {
    threshold: u64,
    timeframe: Timeframe,
}

/// Triggers when fewer than `threshold` events were observed within the
/// trailing timeframe.
pub struct FlatlineRule {
    common: RuleCommon,
    params: FlatlineParams,
    window: EventWindow<()>,
    seen: SeenIds,
}

impl FlatlineRule {
    pub fn from_envelope(common: RuleCommon, env: &RuleEnvelope) -> Result<Self> {
        let params: FlatlineParams = env.params()?;
        let timeframe = params.timeframe.duration();
        Ok(Self {
            common,
            params,
            window: EventWindow::new(timeframe),
            seen: SeenIds::new(timeframe),
        })
    }
}

impl Rule for FlatlineRule {
    fn common(&self) -> &RuleCommon {
        &self.common
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Flatline
    }

    fn build_query(&self, ctx: &QueryContext) -> Result<QueryDescriptor> {
        let lookback = require_timeframe(&self.common, &self.params.timeframe)?;
        Ok(QueryDescriptor::for_rule(&self.common, ctx, ctx.now, lookback)
            .sort_by(self.common.timestamp_field.as_str(), SortOrder::Asc))
    }

    fn garbage_collect(&mut self, now: DateTime<Utc>) {
        self.window.garbage_collect(now);
        self.seen.garbage_collect(now);
    }
}

impl HitsRule for FlatlineRule {
    fn evaluate(&mut self, result: &NormalizedResult, now: DateTime<Utc>) -> Result<MatchResult> {
        let timeframe = self.params.timeframe.duration();
        for hit in &result.hits {
            let ts = hit.timestamp(&self.common.timestamp_field).unwrap_or(now);
            if is_expired(ts, now, timeframe) {
                continue;
            }
            if self.seen.insert(&hit.dedup_key(), ts) {
                self.window.append(ts, ());
            }
        }

        // The reported total covers documents beyond the returned page.
        let count = (self.window.count() as u64).max(result.total.unwrap_or(0));
        if count >= self.params.threshold {
            return Ok(MatchResult::quiet());
        }
        Ok(MatchResult::triggered(MatchContext {
            count: Some(count),
            value: Some(self.params.threshold as f64),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Hit;
    use crate::variants::test_support::*;
    use chrono::Duration;
    use serde_json::json;

    const YAML: &str = r#"
name: heartbeat-missing
index: heartbeat-*
type: flatline
threshold: 2
timeframe: {minutes: 5}
"#;

    #[test]
    fn triggers_below_threshold() {
        let mut rule = build(YAML, FlatlineRule::from_envelope);
        let m = rule
            .evaluate(&hits_result(vec![hit_at("1", now(), json!({}))]), now())
            .unwrap();
        assert!(m.triggered);
        assert_eq!(m.context.count, Some(1));
    }

    #[test]
    fn enough_activity_is_quiet() {
        let mut rule = build(YAML, FlatlineRule::from_envelope);
        let t = now() - Duration::minutes(1);
        let m = rule
            .evaluate(
                &hits_result(vec![hit_at("1", t, json!({})), hit_at("2", t, json!({}))]),
                now(),
            )
            .unwrap();
        assert!(!m.triggered);
    }

    #[test]
    fn activity_ages_out_of_the_window() {
        let mut rule = build(YAML, FlatlineRule::from_envelope);
        let t = now() - Duration::minutes(4);
        let both = hits_result(vec![hit_at("1", t, json!({})), hit_at("2", t, json!({}))]);
        assert!(!rule.evaluate(&both, now()).unwrap().triggered);

        let later = now() + Duration::minutes(2);
        rule.garbage_collect(later);
        assert!(rule.evaluate(&hits_result(vec![]), later).unwrap().triggered);
    }

    #[test]
    fn overlapping_polls_without_ids_do_not_inflate_activity() {
        let mut rule = build(YAML, FlatlineRule::from_envelope);
        let beat = Hit::new(json!({"_source": {"@timestamp": now().to_rfc3339(), "agent": "a1"}}));
        rule.evaluate(&hits_result(vec![beat.clone()]), now()).unwrap();
        let m = rule.evaluate(&hits_result(vec![beat]), now()).unwrap();
        assert!(m.triggered, "one heartbeat seen twice is still below threshold 2");
        assert_eq!(m.context.count, Some(1));
    }
}
