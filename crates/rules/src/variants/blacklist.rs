use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::Result;
use crate::query::QueryDescriptor;
use crate::result::{Hit, NormalizedResult};
use crate::rule::{lookback_or_default, HitsRule, MatchContext, MatchResult, QueryContext, Rule};
use crate::schema::{RuleCommon, RuleEnvelope, RuleType, Timeframe};

#[derive(Debug, Clone, Deserialize)]
struct BlacklistParams {
    compare_key: String,
    blacklist: Vec<String>,
    #[serde(default)]
    ignore_null: bool,
    #[serde(default)]
    timeframe: Option<Timeframe>,
}

/// Triggers when a hit's compare field contains any blacklisted substring.
///
/// An array field matches when any element does. A hit without the
/// compare field matches unless `ignore_null` is set.
pub struct BlacklistRule {
    common: RuleCommon,
    params: BlacklistParams,
}

impl BlacklistRule {
    pub fn from_envelope(common: RuleCommon, env: &RuleEnvelope) -> Result<Self> {
        Ok(Self { common, params: env.params()? })
    }

    /// The offending value, or `None` when the hit is clean.
    fn offending(&self, hit: &Hit) -> Option<String> {
        let values = hit.field_strings(&self.params.compare_key);
        if values.is_empty() {
            return (!self.params.ignore_null).then(|| "<missing>".to_string());
        }
        values
            .into_iter()
            .find(|v| self.params.blacklist.iter().any(|b| v.contains(b.as_str())))
    }
}

impl Rule for BlacklistRule {
    fn common(&self) -> &RuleCommon {
        &self.common
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Blacklist
    }

    fn build_query(&self, ctx: &QueryContext) -> Result<QueryDescriptor> {
        let lookback = lookback_or_default(self.params.timeframe.as_ref(), ctx, ctx.now);
        Ok(QueryDescriptor::for_rule(&self.common, ctx, ctx.now, lookback))
    }
}

impl HitsRule for BlacklistRule {
    fn evaluate(&mut self, result: &NormalizedResult, _now: DateTime<Utc>) -> Result<MatchResult> {
        let matches: Vec<(&Hit, String)> = result
            .hits
            .iter()
            .filter_map(|h| self.offending(h).map(|v| (h, v)))
            .collect();

        let Some((_, first)) = matches.first() else {
            return Ok(MatchResult::quiet());
        };
        Ok(MatchResult::triggered(MatchContext {
            key: Some(self.params.compare_key.clone()),
            current: Some(first.clone()),
            count: Some(matches.len() as u64),
            related: matches
                .iter()
                .filter_map(|(h, _)| h.id().map(str::to_string))
                .collect(),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variants::test_support::*;
    use serde_json::json;

    const YAML: &str = r#"
name: bad-agents
index: web-*
type: blacklist
compare_key: user_agent
blacklist: [sqlmap, nikto]
"#;

    #[test]
    fn substring_match_triggers() {
        let mut rule = build(YAML, BlacklistRule::from_envelope);
        let m = rule
            .evaluate(
                &hits_result(vec![
                    hit("1", json!({"user_agent": "Mozilla/5.0"})),
                    hit("2", json!({"user_agent": "sqlmap/1.7.2#stable"})),
                ]),
                now(),
            )
            .unwrap();
        assert!(m.triggered);
        assert_eq!(m.context.current.as_deref(), Some("sqlmap/1.7.2#stable"));
        assert_eq!(m.context.related, vec!["2".to_string()]);
    }

    #[test]
    fn clean_hits_do_not_trigger() {
        let mut rule = build(YAML, BlacklistRule::from_envelope);
        let m = rule
            .evaluate(
                &hits_result(vec![
                    hit("1", json!({"user_agent": "Mozilla/5.0"})),
                    hit("2", json!({"user_agent": "curl/8.0"})),
                ]),
                now(),
            )
            .unwrap();
        assert!(!m.triggered);
    }

    #[test]
    fn missing_field_depends_on_ignore_null() {
        let result = hits_result(vec![hit("1", json!({"path": "/"}))]);

        let mut strict = build(YAML, BlacklistRule::from_envelope);
        assert!(strict.evaluate(&result, now()).unwrap().triggered);

        let lenient_yaml = format!("{}ignore_null: true\n", YAML);
        let mut lenient = build(&lenient_yaml, BlacklistRule::from_envelope);
        assert!(!lenient.evaluate(&result, now()).unwrap().triggered);
    }

    #[test]
    fn array_field_checks_each_element() {
        let mut rule = build(YAML, BlacklistRule::from_envelope);
        let m = rule
            .evaluate(&hits_result(vec![hit("1", json!({"user_agent": ["curl/8", "sqlmap/1.7"]}))]), now())
            .unwrap();
        assert!(m.triggered);
        assert_eq!(m.context.current.as_deref(), Some("sqlmap/1.7"));

        let m = rule
            .evaluate(&hits_result(vec![hit("2", json!({"user_agent": ["curl/8"]}))]), now())
            .unwrap();
        assert!(!m.triggered);
    }
}
