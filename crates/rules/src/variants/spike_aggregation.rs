use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::Result;
use crate::query::{Aggregation, MetricKind, QueryDescriptor};
use crate::result::NormalizedResult;
use crate::rule::{AggregationRule, MatchContext, MatchResult, QueryContext, Rule};
use crate::schema::{RuleCommon, RuleEnvelope, RuleType, Timeframe};

use super::spike::{find_spike, histogram, BucketGrid, BucketPoint, SpikeType, HISTOGRAM_AGG};

const VALUE_AGG: &str = "value";

fn default_bucket_interval() -> String {
    "1h".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct SpikeAggregationParams {
    /// Field whose values are counted per bucket.
    query_key: String,
    timeframe: Timeframe,
    spike_height: f64,
    spike_type: SpikeType,
    #[serde(default = "default_bucket_interval")]
    bucket_interval: String,
}

/// Discrete difference of per-bucket value counts.
///
/// up: `diff > spike_height`, down: `diff < -spike_height`,
/// both: `|diff| > spike_height`.
pub struct SpikeAggregationRule {
    common: RuleCommon,
    params: SpikeAggregationParams,
    last_alerted: Option<i64>,
}

impl SpikeAggregationRule {
    pub fn from_envelope(common: RuleCommon, env: &RuleEnvelope) -> Result<Self> {
        Ok(Self { common, params: env.params()?, last_alerted: None })
    }

    fn grid(&self, now: DateTime<Utc>) -> Result<BucketGrid> {
        BucketGrid::new(&self.common, &self.params.bucket_interval, &self.params.timeframe, now)
    }

    fn is_spike(&self, prev: f64, cur: f64) -> bool {
        let diff = cur - prev;
        let h = self.params.spike_height;
        match self.params.spike_type {
            SpikeType::Up => diff > h,
            SpikeType::Down => diff < -h,
            SpikeType::Both => diff.abs() > h,
        }
    }
}

impl Rule for SpikeAggregationRule {
    fn common(&self) -> &RuleCommon {
        &self.common
    }

    fn rule_type(&self) -> RuleType {
        RuleType::SpikeAggregation
    }

    fn build_query(&self, ctx: &QueryContext) -> Result<QueryDescriptor> {
        let grid = self.grid(ctx.now)?;
        let counted = Aggregation::metric(MetricKind::ValueCount, self.params.query_key.as_str());
        Ok(grid
            .query(&self.common, ctx)
            .size(0)
            .aggregate(
                HISTOGRAM_AGG,
                histogram(&self.common, &self.params.bucket_interval, Some((VALUE_AGG, counted))),
            ))
    }
}

impl AggregationRule for SpikeAggregationRule {
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
            .map(|b| BucketPoint::read(b, b.sub(VALUE_AGG)?.value()?.unwrap_or(0.0)))
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
            ..Default::default()
        }))
    }
}
