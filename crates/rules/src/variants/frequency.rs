use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::Result;
use crate::query::{QueryDescriptor, SortOrder};
use crate::result::NormalizedResult;
use crate::rule::{require_timeframe, HitsRule, MatchContext, MatchResult, QueryContext, Rule};
use crate::schema::{group_key, QueryKey, RuleCommon, RuleEnvelope, RuleType, Timeframe};
use crate::window::{KeyedWindows, SeenIds};

#[derive(Debug, Clone, Deserialize)]
struct FrequencyParams {
    num_events: usize,
    timeframe: Timeframe,
    #[serde(default)]
    query_key: Option<QueryKey>,
    #[serde(default)]
    attach_related: bool,
}

/// Triggers when `num_events` events for one key accumulate within the
/// timeframe. The key's window is cleared on trigger.
pub struct FrequencyRule {
    common: RuleCommon,
    params: FrequencyParams,
    windows: KeyedWindows<String>,
    seen: SeenIds,
}

impl FrequencyRule {
    pub fn from_envelope(common: RuleCommon, env: &RuleEnvelope) -> Result<Self> {
        let params: FrequencyParams = env.params()?;
        let timeframe = params.timeframe.duration();
        Ok(Self {
            common,
            params,
            windows: KeyedWindows::new(timeframe),
            seen: SeenIds::new(timeframe),
        })
    }

    fn timeframe(&self) -> Duration {
        self.params.timeframe.duration()
    }

    /// Number of events currently held for `key`.
    pub fn window_count(&self, key: &str) -> usize {
        self.windows.get(key).map(|w| w.count()).unwrap_or(0)
    }
}

impl Rule for FrequencyRule {
    fn common(&self) -> &RuleCommon {
        &self.common
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Frequency
    }

    fn build_query(&self, ctx: &QueryContext) -> Result<QueryDescriptor> {
        let lookback = require_timeframe(&self.common, &self.params.timeframe)?;
        Ok(QueryDescriptor::for_rule(&self.common, ctx, ctx.now, lookback)
            .sort_by(self.common.timestamp_field.as_str(), SortOrder::Asc))
    }

    fn garbage_collect(&mut self, now: DateTime<Utc>) {
        let removed = self.windows.garbage_collect(now);
        self.seen.garbage_collect(now);
        if removed > 0 {
            debug!(rule = %self.common.name, removed, "expired frequency events");
        }
    }
}

impl HitsRule for FrequencyRule {
    fn evaluate(&mut self, result: &NormalizedResult, now: DateTime<Utc>) -> Result<MatchResult> {
        let timeframe = self.timeframe();
        let mut outcome = MatchResult::quiet();

        for hit in &result.hits {
            let ts = hit.timestamp(&self.common.timestamp_field).unwrap_or(now);
            if crate::window::is_expired(ts, now, timeframe) {
                continue;
            }
            let id = hit.dedup_key();
            if !self.seen.insert(&id, ts) {
                continue;
            }

            let key = group_key(self.params.query_key.as_ref(), hit);
            let window = self.windows.entry(&key);
            window.append(ts, id);

            if window.count() >= self.params.num_events {
                let related = if self.params.attach_related {
                    window.iter().map(|(_, id)| id.clone()).collect()
                } else {
                    Vec::new()
                };
                outcome = MatchResult::triggered(MatchContext {
                    key: Some(key),
                    count: Some(window.count() as u64),
                    related,
                    ..Default::default()
                });
                window.clear();
            }
        }

        Ok(outcome)
    }
}
