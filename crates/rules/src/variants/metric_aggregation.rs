use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::error::Result;
use crate::query::{Aggregation, MetricKind, QueryDescriptor};
use crate::result::{AggNode, NormalizedResult};
use crate::rule::{
    lookback_or_default, outside_bounds, AggregationRule, MatchContext, MatchResult, QueryContext,
    Rule,
};
use crate::schema::{RuleCommon, RuleEnvelope, RuleType, Timeframe};

const METRIC_AGG: &str = "metric";
const BY_KEY_AGG: &str = "by_key";

fn default_percentile() -> f64 {
    95.0
}

fn default_terms_size() -> usize {
    50
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricAggType {
    Min,
    Max,
    Avg,
    Sum,
    Cardinality,
    ValueCount,
    Percentiles,
}

#[derive(Debug, Clone, Deserialize)]
struct MetricAggregationParams {
    metric_agg_key: String,
    metric_agg_type: MetricAggType,
    #[serde(default)]
    max_threshold: f64,
    #[serde(default)]
    min_threshold: f64,
    #[serde(default = "default_percentile")]
    percentile_range: f64,
    #[serde(default)]
    calculation_window: Option<Timeframe>,
    /// Overrides the global buffer time for this rule.
    #[serde(default)]
    buffer_time: Option<Timeframe>,
    #[serde(default)]
    query_key: Option<String>,
    #[serde(default = "default_terms_size")]
    terms_size: usize,
}

/// Computes one metric over `[now - buffer - window, now - buffer)` and
/// triggers when it leaves `[min_threshold, max_threshold]`.
///
/// A value of exactly 0, or a null value, means no data and never triggers.
/// With `query_key` the metric is computed and checked per term bucket.
pub struct MetricAggregationRule {
    common: RuleCommon,
    params: MetricAggregationParams,
}

impl MetricAggregationRule {
    pub fn from_envelope(common: RuleCommon, env: &RuleEnvelope) -> Result<Self> {
        Ok(Self { common, params: env.params()? })
    }

    fn metric(&self) -> Aggregation {
        let field = self.params.metric_agg_key.clone();
        let kind = match self.params.metric_agg_type {
            MetricAggType::Min => MetricKind::Min,
            MetricAggType::Max => MetricKind::Max,
            MetricAggType::Avg => MetricKind::Avg,
            MetricAggType::Sum => MetricKind::Sum,
            MetricAggType::Cardinality => MetricKind::Cardinality,
            MetricAggType::ValueCount => MetricKind::ValueCount,
            MetricAggType::Percentiles => {
                return Aggregation::Percentiles {
                    field,
                    percents: vec![self.params.percentile_range],
                }
            }
        };
        Aggregation::metric(kind, field)
    }

    fn read_value(&self, metric: AggNode<'_>) -> Result<Option<f64>> {
        if self.params.metric_agg_type == MetricAggType::Percentiles {
            metric.percentile_value()
        } else {
            metric.value()
        }
    }

    fn check(&self, value: Option<f64>) -> Option<f64> {
        match value {
            Some(v) if v != 0.0 => {
                outside_bounds(v, self.params.min_threshold, self.params.max_threshold).then_some(v)
            }
            _ => None,
        }
    }

    fn buffer(&self, ctx: &QueryContext) -> Duration {
        self.params
            .buffer_time
            .map(|b| b.duration())
            .unwrap_or(ctx.buffer_time)
    }
}

impl Rule for MetricAggregationRule {
    fn common(&self) -> &RuleCommon {
        &self.common
    }

    fn rule_type(&self) -> RuleType {
        RuleType::MetricAggregation
    }

    fn build_query(&self, ctx: &QueryContext) -> Result<QueryDescriptor> {
        let end = ctx.now - self.buffer(ctx);
        let window = lookback_or_default(self.params.calculation_window.as_ref(), ctx, end);
        let q = QueryDescriptor::for_rule(&self.common, ctx, end, window).size(0);
        Ok(match &self.params.query_key {
            None => q.aggregate(METRIC_AGG, self.metric()),
            Some(key) => q.aggregate(
                BY_KEY_AGG,
                Aggregation::terms(key.as_str(), self.params.terms_size)
                    .with_sub(METRIC_AGG, self.metric()),
            ),
        })
    }
}

impl AggregationRule for MetricAggregationRule {
    fn evaluate_aggregations(
        &mut self,
        result: &NormalizedResult,
        _now: DateTime<Utc>,
    ) -> Result<MatchResult> {
        if self.params.query_key.is_none() {
            let value = self.read_value(result.aggregation(METRIC_AGG)?)?;
            return Ok(match self.check(value) {
                Some(v) => MatchResult::triggered(MatchContext { value: Some(v), ..Default::default() }),
                None => MatchResult::quiet(),
            });
        }

        for bucket in result.aggregation(BY_KEY_AGG)?.buckets()? {
            if let Some(v) = self.check(self.read_value(bucket.sub(METRIC_AGG)?)?) {
                return Ok(MatchResult::triggered(MatchContext {
                    key: Some(bucket.key()?),
                    value: Some(v),
                    count: bucket.doc_count().ok(),
                    ..Default::default()
                }));
            }
        }
        Ok(MatchResult::quiet())
    }
}
