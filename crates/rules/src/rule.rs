//! The rule contract: a base [`Rule`] trait plus one capability trait per
//! evaluation style, resolved once at construction into [`RuleHandle`].

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{Result, RuleError};
use crate::query::QueryDescriptor;
use crate::result::NormalizedResult;
use crate::schema::{RuleCommon, RuleType, Timeframe};

/// Per-cycle inputs to query construction.
#[derive(Debug, Clone, Copy)]
pub struct QueryContext {
    /// Cycle anchor; every time range is computed from it.
    pub now: DateTime<Utc>,
    /// Indexing-lag allowance, used by metric aggregation windows.
    pub buffer_time: Duration,
    /// Lookback for rules without a timeframe on their first cycle (the
    /// polling interval).
    pub default_lookback: Duration,
    /// Result size for hit queries.
    pub max_hits: usize,
    /// Where this rule's previous query window ended. Rules without a
    /// timeframe continue from here so no span goes unqueried.
    pub since: Option<DateTime<Utc>>,
}

impl QueryContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            buffer_time: Duration::minutes(15),
            default_lookback: Duration::minutes(1),
            max_hits: 1000,
            since: None,
        }
    }
}

/// Operations every rule type provides.
pub trait Rule: Send {
    fn common(&self) -> &RuleCommon;

    fn rule_type(&self) -> RuleType;

    fn name(&self) -> &str {
        &self.common().name
    }

    fn index_target(&self) -> &str {
        &self.common().index
    }

    /// Build this cycle's query.
    fn build_query(&self, ctx: &QueryContext) -> Result<QueryDescriptor>;

    /// Evict window entries older than the rule's timeframe.
    fn garbage_collect(&mut self, _now: DateTime<Utc>) {}
}

/// Evaluates the hit list of a single result.
pub trait HitsRule: Rule {
    fn evaluate(&mut self, result: &NormalizedResult, now: DateTime<Utc>) -> Result<MatchResult>;
}

/// Evaluates the aggregation tree of a single result.
pub trait AggregationRule: Rule {
    fn evaluate_aggregations(
        &mut self,
        result: &NormalizedResult,
        now: DateTime<Utc>,
    ) -> Result<MatchResult>;
}

/// Compares the current window's result with the adjacent previous window's.
pub trait DualRule: Rule {
    fn evaluate_dual(
        &mut self,
        current: &NormalizedResult,
        previous: &NormalizedResult,
    ) -> Result<MatchResult>;
}

/// A loaded rule with its evaluation capability.
pub enum RuleHandle {
    Hits(Box<dyn HitsRule>),
    Aggregation(Box<dyn AggregationRule>),
    Dual(Box<dyn DualRule>),
}

impl RuleHandle {
    pub fn common(&self) -> &RuleCommon {
        match self {
            RuleHandle::Hits(r) => r.common(),
            RuleHandle::Aggregation(r) => r.common(),
            RuleHandle::Dual(r) => r.common(),
        }
    }

    pub fn name(&self) -> &str {
        &self.common().name
    }

    pub fn index_target(&self) -> &str {
        &self.common().index
    }

    pub fn rule_type(&self) -> RuleType {
        match self {
            RuleHandle::Hits(r) => r.rule_type(),
            RuleHandle::Aggregation(r) => r.rule_type(),
            RuleHandle::Dual(r) => r.rule_type(),
        }
    }

    pub fn is_dual(&self) -> bool {
        matches!(self, RuleHandle::Dual(_))
    }

    pub fn build_query(&self, ctx: &QueryContext) -> Result<QueryDescriptor> {
        match self {
            RuleHandle::Hits(r) => r.build_query(ctx),
            RuleHandle::Aggregation(r) => r.build_query(ctx),
            RuleHandle::Dual(r) => r.build_query(ctx),
        }
    }

    pub fn garbage_collect(&mut self, now: DateTime<Utc>) {
        match self {
            RuleHandle::Hits(r) => r.garbage_collect(now),
            RuleHandle::Aggregation(r) => r.garbage_collect(now),
            RuleHandle::Dual(r) => r.garbage_collect(now),
        }
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchResult {
    pub triggered: bool,
    #[serde(flatten)]
    pub context: MatchContext,
}

/// Details used to format the alert message. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub terms: Vec<String>,
    /// Document ids related to the match (e.g. the events that filled a window).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<String>,
}

impl MatchResult {
    pub fn quiet() -> Self {
        Self::default()
    }

    pub fn triggered(context: MatchContext) -> Self {
        Self { triggered: true, context }
    }

    /// One-line description of the match context, e.g. `key=u1 previous=A current=B`.
    pub fn summary(&self) -> String {
        let c = &self.context;
        let mut parts = Vec::new();
        if let Some(k) = &c.key {
            parts.push(format!("key={}", k));
        }
        if let Some(n) = c.count {
            parts.push(format!("count={}", n));
        }
        if let Some(p) = &c.previous {
            parts.push(format!("previous={}", p));
        }
        if let Some(cur) = &c.current {
            parts.push(format!("current={}", cur));
        }
        if let Some(p) = c.percentage {
            parts.push(format!("percentage={:.2}%", p));
        }
        if let Some(v) = c.value {
            parts.push(format!("value={}", v));
        }
        if !c.terms.is_empty() {
            parts.push(format!("terms=[{}]", c.terms.join(", ")));
        }
        if parts.is_empty() {
            "condition met".to_string()
        } else {
            parts.join(" ")
        }
    }
}

/// Resolve a windowed rule's timeframe; zero is a query-build error.
pub(crate) fn require_timeframe(common: &RuleCommon, timeframe: &Timeframe) -> Result<Duration> {
    if timeframe.is_zero() {
        return Err(RuleError::query(
            &common.name,
            "timeframe must be greater than zero",
        ));
    }
    Ok(timeframe.duration())
}

/// Lookback for a window ending at `end`: the timeframe when configured and
/// non-zero, otherwise back to where the previous window ended, or one
/// polling interval when there is none.
pub(crate) fn lookback_or_default(
    timeframe: Option<&Timeframe>,
    ctx: &QueryContext,
    end: DateTime<Utc>,
) -> Duration {
    match timeframe {
        Some(tf) if !tf.is_zero() => tf.duration(),
        _ => match ctx.since {
            Some(since) if since < end => end - since,
            _ => ctx.default_lookback,
        },
    }
}

/// `value > max` or `value < min`, where a bound of `0` is not configured.
pub(crate) fn outside_bounds(value: f64, min: f64, max: f64) -> bool {
    (max != 0.0 && value > max) || (min != 0.0 && value < min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_bounds_are_unconfigured() {
        assert!(!outside_bounds(50.0, 0.0, 0.0));
        assert!(outside_bounds(50.0, 0.0, 40.0));
        assert!(outside_bounds(5.0, 10.0, 0.0));
        assert!(!outside_bounds(15.0, 10.0, 40.0));
        assert!(outside_bounds(45.0, 10.0, 40.0));
    }

    #[test]
    fn summary_lists_present_fields() {
        let m = MatchResult::triggered(MatchContext {
            key: Some("u1".into()),
            previous: Some("A".into()),
            current: Some("B".into()),
            ..Default::default()
        });
        assert_eq!(m.summary(), "key=u1 previous=A current=B");
        assert_eq!(MatchResult::quiet().summary(), "condition met");
    }

    #[test]
    fn lookback_continues_from_previous_window() {
        use chrono::TimeZone;
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 1, 5).unwrap();
        let mut ctx = QueryContext::new(now);
        assert_eq!(lookback_or_default(None, &ctx, now), Duration::minutes(1));

        ctx.since = Some(now - Duration::seconds(65));
        assert_eq!(lookback_or_default(None, &ctx, now), Duration::seconds(65));
        assert_eq!(
            lookback_or_default(Some(&Timeframe::minutes(0)), &ctx, now),
            Duration::seconds(65)
        );
        // A configured timeframe always wins.
        assert_eq!(
            lookback_or_default(Some(&Timeframe::minutes(10)), &ctx, now),
            Duration::minutes(10)
        );
        // A cursor at or past the window end falls back to one interval.
        ctx.since = Some(now);
        assert_eq!(lookback_or_default(None, &ctx, now), Duration::minutes(1));
    }
}
