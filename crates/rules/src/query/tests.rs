//! Tests for query construction and body round-trips.

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use super::*;
use crate::rule::QueryContext;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn sample_query() -> QueryDescriptor {
    QueryDescriptor::new("auth-*")
        .filter(Clause::term("event.outcome", "failure"))
        .filter(Clause::Raw(json!({"match_phrase": {"message": "bad password"}})))
        .exclude(Clause::terms("user", ["svc-backup"]))
        .aggregate(
            "over_time",
            Aggregation::DateHistogram {
                field: "@timestamp".into(),
                fixed_interval: "5m".into(),
                aggs: Aggs::new(),
            }
            .with_sub("users", Aggregation::metric(MetricKind::ValueCount, "user")),
        )
        .aggregate(
            "p95",
            Aggregation::Percentiles { field: "latency".into(), percents: vec![95.0] },
        )
        .sort_by("@timestamp", SortOrder::Asc)
        .size(500)
}

#[test]
fn body_round_trips() {
    let mut q = sample_query();
    q.time_range = Some(TimeRange::ending_at("@timestamp", now(), Duration::hours(1)));

    let body = q.to_body();
    let parsed = QueryDescriptor::from_body("auth-*", &body).unwrap();
    assert_eq!(parsed, q);
    assert_eq!(parsed.to_body(), body);
}

#[test]
fn body_shape() {
    let mut q = QueryDescriptor::new("logs").size(10);
    q.time_range = Some(TimeRange::ending_at("ts", now(), Duration::minutes(30)));
    let q = q.filter(Clause::exists("user"));

    assert_eq!(
        q.to_body(),
        json!({
            "size": 10,
            "query": {"bool": {"filter": [
                {"range": {"ts": {
                    "gte": "2024-05-01T11:30:00.000Z",
                    "lt": "2024-05-01T12:00:00.000Z",
                    "format": "strict_date_optional_time"
                }}},
                {"exists": {"field": "user"}}
            ]}}
        })
    );
}

#[test]
fn rebuilt_each_cycle_differs_only_in_time_anchor() {
    let common: crate::schema::RuleCommon = serde_yaml::from_str(
        "name: r\nindex: logs\ntype: any\nfilter:\n  - term: {level: error}\n",
    )
    .unwrap();
    let first = QueryDescriptor::for_rule(&common, &QueryContext::new(now()), now(), Duration::minutes(5));
    let later = now() + Duration::minutes(1);
    let mut second =
        QueryDescriptor::for_rule(&common, &QueryContext::new(later), later, Duration::minutes(5));

    assert_ne!(first, second);
    second.time_range = first.time_range.clone();
    assert_eq!(first, second);
}

#[test]
fn previous_window_is_adjacent_and_keeps_clauses() {
    let mut q = sample_query();
    q.time_range = Some(TimeRange::ending_at("@timestamp", now(), Duration::days(30)));

    let prev = q.shifted_to_previous();
    let cur_range = q.time_range.as_ref().unwrap();
    let prev_range = prev.time_range.as_ref().unwrap();

    assert_eq!(prev_range.lt, cur_range.gte);
    assert_eq!(prev_range.length(), cur_range.length());
    assert_eq!(prev_range.gte, now() - Duration::days(60));
    assert_eq!(prev.filters, q.filters);
    assert_eq!(prev.must_not, q.must_not);
    assert_eq!(prev.aggregations, q.aggregations);
    assert_eq!(prev.sort, q.sort);
    assert_eq!(prev.size, q.size);
}

#[test]
fn user_range_filter_is_not_mistaken_for_time_range() {
    let body = json!({
        "size": 0,
        "query": {"bool": {"filter": [
            {"range": {"bytes": {"gte": 100}}}
        ]}}
    });
    let q = QueryDescriptor::from_body("logs", &body).unwrap();
    assert!(q.time_range.is_none());
    assert_eq!(q.filters.len(), 1);
}

#[test]
fn malformed_bodies_are_rejected() {
    assert!(matches!(
        QueryDescriptor::from_body("logs", &json!({"query": {}})),
        Err(RuleError::InvalidQuery(_))
    ));
    assert!(matches!(
        QueryDescriptor::from_body(
            "logs",
            &json!({"size": 0, "query": {"bool": {}}, "aggs": {"x": {"geo_bounds": {"field": "loc"}}}})
        ),
        Err(RuleError::InvalidQuery(_))
    ));
}
