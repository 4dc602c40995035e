use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, RuleError};
use crate::query::{Aggregation, Aggs, QueryDescriptor};
use crate::result::{AggNode, NormalizedResult};
use crate::rule::{
    require_timeframe, AggregationRule, MatchContext, MatchResult, QueryContext, Rule,
};
use crate::schema::{RuleCommon, RuleEnvelope, RuleType, Timeframe};

pub(crate) const HISTOGRAM_AGG: &str = "events_over_time";

fn default_bucket_interval() -> String {
    "1h".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpikeType {
    Up,
    Down,
    Both,
}

/// One histogram bucket reduced to its epoch key and measured value.
#[derive(Debug, Clone)]
pub(crate) struct BucketPoint {
    pub epoch: Option<i64>,
    pub label: String,
    pub value: f64,
}

impl BucketPoint {
    pub(crate) fn read(bucket: &AggNode<'_>, value: f64) -> Result<Self> {
        Ok(Self {
            epoch: bucket.raw().get("key").and_then(Value::as_i64),
            label: bucket.key()?,
            value,
        })
    }
}

/// Whole histogram buckets covering a timeframe. The range ends where the
/// still-open bucket begins and starts on a bucket boundary, so every bucket
/// inside it spans a full interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BucketGrid {
    pub interval: Duration,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BucketGrid {
    pub(crate) fn new(
        common: &RuleCommon,
        interval: &str,
        timeframe: &Timeframe,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let lookback = require_timeframe(common, timeframe)?;
        let step = lookout_core::parse_duration(interval)
            .and_then(|d| Duration::from_std(d).ok())
            .filter(|d| *d > Duration::zero())
            .ok_or_else(|| {
                RuleError::query(&common.name, format!("invalid bucket_interval '{}'", interval))
            })?;
        let end = floor_to(now, step);
        let start = floor_to(end - lookback, step);
        Ok(Self { interval: step, start, end })
    }

    /// Base query over exactly the grid's range.
    pub(crate) fn query(&self, common: &RuleCommon, ctx: &QueryContext) -> QueryDescriptor {
        QueryDescriptor::for_rule(common, ctx, self.end, self.end - self.start)
    }

    /// Drop buckets that begin before the grid or are not yet closed.
    /// Buckets without an epoch key are kept.
    pub(crate) fn complete(&self, points: Vec<BucketPoint>) -> Vec<BucketPoint> {
        let start = self.start.timestamp_millis();
        let end = self.end.timestamp_millis();
        let step = self.interval.num_milliseconds();
        points
            .into_iter()
            .filter(|p| match p.epoch {
                Some(e) => e >= start && e + step <= end,
                None => true,
            })
            .collect()
    }
}

/// Round `t` down to a multiple of `step` since the Unix epoch, which is
/// where fixed-interval histogram buckets begin.
fn floor_to(t: DateTime<Utc>, step: Duration) -> DateTime<Utc> {
    let step = step.num_milliseconds();
    let ms = t.timestamp_millis();
    DateTime::from_timestamp_millis(ms - ms.rem_euclid(step)).unwrap_or(t)
}

/// Date histogram over the rule's window, shared by both spike rule types.
pub(crate) fn histogram(
    common: &RuleCommon,
    interval: &str,
    sub: Option<(&str, Aggregation)>,
) -> Aggregation {
    let mut aggs = Aggs::new();
    if let Some((name, agg)) = sub {
        aggs.insert(name.to_string(), agg);
    }
    Aggregation::DateHistogram {
        field: common.timestamp_field.clone(),
        fixed_interval: interval.to_string(),
        aggs,
    }
}

/// Latest consecutive pair `(prev, cur)` satisfying `is_spike`, skipping
/// buckets at or before `after` so a spike is reported once.
pub(crate) fn find_spike<'a>(
    points: &'a [BucketPoint],
    after: Option<i64>,
    is_spike: impl Fn(f64, f64) -> bool,
) -> Option<(&'a BucketPoint, &'a BucketPoint)> {
    points
        .windows(2)
        .filter(|w| match (after, w[1].epoch) {
            (Some(a), Some(e)) => e > a,
            _ => true,
        })
        .filter(|w| is_spike(w[0].value, w[1].value))
        .map(|w| (&w[0], &w[1]))
        .last()
}

#[derive(Debug, Clone, Deserialize)]
struct SpikeParams {
    spike_height: f64,
    spike_type: SpikeType,
    #[serde(default)]
    threshold_cur: f64,
    timeframe: Timeframe,
    #[serde(default = "default_bucket_interval")]
    bucket_interval: String,
}

/// Compares document counts of consecutive histogram buckets.
///
/// - up: `cur >= threshold_cur` and `cur - prev >= spike_height`
/// - down: `cur <= threshold_cur` and `prev - cur >= spike_height`
///
/// A `threshold_cur` of 0 disables the level check.
pub struct SpikeRule {
    common: RuleCommon,
    params: SpikeParams,
    last_alerted: Option<i64>,
}

impl SpikeRule {
    pub fn from_envelope(common: RuleCommon, env: &RuleEnvelope) -> Result<Self> {
        Ok(Self { common, params: env.params()?, last_alerted: None })
    }

    fn grid(&self, now: DateTime<Utc>) -> Result<BucketGrid> {
        BucketGrid::new(&self.common, &self.params.bucket_interval, &self.params.timeframe, now)
    }

    fn is_spike(&self, prev: f64, cur: f64) -> bool {
        let p = &self.params;
        let level_off = p.threshold_cur == 0.0;
        let up = (level_off || cur >= p.threshold_cur) && cur - prev >= p.spike_height;
        let down = (level_off || cur <= p.threshold_cur) && prev - cur >= p.spike_height;
        match p.spike_type {
            SpikeType::Up => up,
            SpikeType::Down => down,
            SpikeType::Both => up || down,
        }
    }
}

impl Rule for SpikeRule {
    fn common(&self) -> &RuleCommon {
        &self.common
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Spike
    }

    fn build_query(&self, ctx: &QueryContext) -> Result<QueryDescriptor> {
        let grid = self.grid(ctx.now)?;
        Ok(grid
            .query(&self.common, ctx)
            .size(0)
            .aggregate(
                HISTOGRAM_AGG,
                histogram(&self.common, &self.params.bucket_interval, None),
            ))
    }
}

impl AggregationRule for SpikeRule {
    fn evaluate_aggregations(
        &mut self,
        result: &NormalizedResult,
        now: DateTime<Utc>,
    ) -> Result<MatchResult> {
        let grid = self.grid(now)?;
        let points = result
            .aggregation(HISTOGRAM_AGG)?
            .buckets()?
            .iter()
            .map(|b| BucketPoint::read(b, b.doc_count()? as f64))
            .collect::<Result<Vec<_>>>()?;
        let points = grid.complete(points);

        let Some((prev, cur)) = find_spike(&points, self.last_alerted, |p, c| self.is_spike(p, c))
        else {
            return Ok(MatchResult::quiet());
        };
        if cur.epoch.is_some() {
            self.last_alerted = cur.epoch;
        }
        Ok(MatchResult::triggered(MatchContext {
            key: Some(cur.label.clone()),
            previous: Some(prev.value.to_string()),
            current: Some(cur.value.to_string()),
            value: Some(cur.value - prev.value),
            count: Some(cur.value as u64),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variants::test_support::*;
    use chrono::TimeZone;
    use serde_json::json;

    const YAML: &str = r#"
name: login-spike
index: auth-*
type: spike
spike_height: 5
spike_type: up
threshold_cur: 10
timeframe: {hours: 3}
"#;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
    }

    /// Hourly buckets starting at `first`.
    fn hourly(first: DateTime<Utc>, counts: &[u64]) -> NormalizedResult {
        let buckets: Vec<_> = counts
            .iter()
            .enumerate()
            .map(|(i, c)| {
                json!({
                    "key": first.timestamp_millis() + i as i64 * 3_600_000,
                    "key_as_string": format!("bucket-{}", i),
                    "doc_count": c
                })
            })
            .collect();
        agg_result(json!({ HISTOGRAM_AGG: { "buckets": buckets } }))
    }

    /// Hourly buckets filling the 3h window that closes at `now()`.
    fn histogram_result(counts: &[u64]) -> NormalizedResult {
        hourly(at(9, 0), counts)
    }

    #[test]
    fn up_spike_on_third_bucket() {
        let mut rule = build(YAML, SpikeRule::from_envelope);
        let m = rule.evaluate_aggregations(&histogram_result(&[5, 5, 12]), now()).unwrap();
        assert!(m.triggered);
        assert_eq!(m.context.key.as_deref(), Some("bucket-2"));
        assert_eq!(m.context.value, Some(7.0));
    }

    #[test]
    fn gradual_growth_is_quiet() {
        let mut rule = build(YAML, SpikeRule::from_envelope);
        let m = rule.evaluate_aggregations(&histogram_result(&[5, 6, 7]), now()).unwrap();
        assert!(!m.triggered);
    }

    #[test]
    fn same_spike_is_reported_once() {
        let mut rule = build(YAML, SpikeRule::from_envelope);
        let result = histogram_result(&[5, 5, 12]);
        assert!(rule.evaluate_aggregations(&result, now()).unwrap().triggered);
        assert!(!rule.evaluate_aggregations(&result, now()).unwrap().triggered);
    }

    #[test]
    fn down_spike_respects_level() {
        let yaml = YAML.replace("spike_type: up", "spike_type: down");
        let mut rule = build(&yaml, SpikeRule::from_envelope);
        assert!(rule.evaluate_aggregations(&histogram_result(&[20, 8]), now()).unwrap().triggered);

        let mut rule = build(&yaml, SpikeRule::from_envelope);
        assert!(!rule.evaluate_aggregations(&histogram_result(&[30, 20]), now()).unwrap().triggered);
    }

    #[test]
    fn query_requests_histogram_only() {
        let rule = build(YAML, SpikeRule::from_envelope);
        let q = rule.build_query(&ctx()).unwrap();
        assert_eq!(q.size, 0);
        assert!(matches!(
            q.aggregations.get(HISTOGRAM_AGG),
            Some(Aggregation::DateHistogram { fixed_interval, .. }) if fixed_interval == "1h"
        ));
    }

    #[test]
    fn missing_histogram_is_a_parse_error() {
        let mut rule = build(YAML, SpikeRule::from_envelope);
        assert!(rule.evaluate_aggregations(&hits_result(vec![]), now()).is_err());
    }

    #[test]
    fn query_window_snaps_to_bucket_boundaries() {
        let rule = build(YAML, SpikeRule::from_envelope);
        let q = rule.build_query(&QueryContext { now: at(12, 30), ..ctx() }).unwrap();
        let range = q.time_range.unwrap();
        assert_eq!(range.gte, at(9, 0));
        assert_eq!(range.lt, at(12, 0));
    }

    #[test]
    fn steady_traffic_with_partial_edge_buckets_is_quiet() {
        let yaml = "name: s\nindex: i\ntype: spike\nspike_height: 3\nspike_type: both\ntimeframe: {hours: 3}\n";
        let mut rule = build(yaml, SpikeRule::from_envelope);
        // 08:00 starts before the window and 12:00 is still open at 12:30.
        let result = hourly(at(8, 0), &[5, 10, 10, 10, 5]);
        let m = rule.evaluate_aggregations(&result, at(12, 30)).unwrap();
        assert!(!m.triggered, "{:?}", m.context);

        // A real jump between closed buckets still alerts.
        let result = hourly(at(8, 0), &[5, 10, 10, 20, 5]);
        let m = rule.evaluate_aggregations(&result, at(12, 30)).unwrap();
        assert!(m.triggered);
        assert_eq!(m.context.key.as_deref(), Some("bucket-3"));
    }

    #[test]
    fn invalid_bucket_interval_fails_query_build() {
        let yaml = format!("{}bucket_interval: soon\n", YAML);
        let rule = build(&yaml, SpikeRule::from_envelope);
        assert!(matches!(rule.build_query(&ctx()), Err(RuleError::QueryBuild { .. })));
    }
}
