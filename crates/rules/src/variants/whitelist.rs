use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::Result;
use crate::query::{Clause, QueryDescriptor};
use crate::result::{Hit, NormalizedResult};
use crate::rule::{lookback_or_default, HitsRule, MatchContext, MatchResult, QueryContext, Rule};
use crate::schema::{RuleCommon, RuleEnvelope, RuleType, Timeframe};

#[derive(Debug, Clone, Deserialize)]
struct WhitelistParams {
    compare_key: String,
    whitelist: Vec<String>,
    #[serde(default)]
    ignore_null: bool,
    #[serde(default)]
    timeframe: Option<Timeframe>,
}

/// Triggers when a hit's compare field holds a value outside the allowed set.
///
/// The query already excludes allowed values; evaluation re-checks so the
/// rule stays correct against a backend that ignores `must_not`.
pub struct WhitelistRule {
    common: RuleCommon,
    params: WhitelistParams,
}

impl WhitelistRule {
    pub fn from_envelope(common: RuleCommon, env: &RuleEnvelope) -> Result<Self> {
        Ok(Self { common, params: env.params()? })
    }

    /// First value outside the allowed set; array fields are checked per element.
    fn offending(&self, hit: &Hit) -> Option<String> {
        let values = hit.field_strings(&self.params.compare_key);
        if values.is_empty() {
            return (!self.params.ignore_null).then(|| "<missing>".to_string());
        }
        values.into_iter().find(|v| !self.params.whitelist.contains(v))
    }
}

impl Rule for WhitelistRule {
    fn common(&self) -> &RuleCommon {
        &self.common
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Whitelist
    }

    fn build_query(&self, ctx: &QueryContext) -> Result<QueryDescriptor> {
        let lookback = lookback_or_default(self.params.timeframe.as_ref(), ctx, ctx.now);
        let mut q = QueryDescriptor::for_rule(&self.common, ctx, ctx.now, lookback);
        if !self.params.whitelist.is_empty() {
            q = q.exclude(Clause::terms(
                self.params.compare_key.as_str(),
                self.params.whitelist.iter().cloned(),
            ));
        }
        Ok(q)
    }
}

impl HitsRule for WhitelistRule {
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
name: unexpected-country
index: auth-*
type: whitelist
compare_key: geo.country
whitelist: [DE, NL]
"#;

    #[test]
    fn value_outside_allowed_set_triggers() {
        let mut rule = build(YAML, WhitelistRule::from_envelope);
        let m = rule
            .evaluate(
                &hits_result(vec![
                    hit("1", json!({"geo": {"country": "DE"}})),
                    hit("2", json!({"geo": {"country": "KP"}})),
                ]),
                now(),
            )
            .unwrap();
        assert!(m.triggered);
        assert_eq!(m.context.current.as_deref(), Some("KP"));
    }

    #[test]
    fn allowed_values_are_quiet() {
        let mut rule = build(YAML, WhitelistRule::from_envelope);
        let m = rule
            .evaluate(&hits_result(vec![hit("1", json!({"geo": {"country": "NL"}}))]), now())
            .unwrap();
        assert!(!m.triggered);
    }

    #[test]
    fn query_excludes_allowed_values() {
        let rule = build(YAML, WhitelistRule::from_envelope);
        let q = rule.build_query(&ctx()).unwrap();
        assert_eq!(q.must_not, vec![Clause::terms("geo.country", ["DE", "NL"])]);
    }

    #[test]
    fn missing_field_is_suspicious_unless_ignored() {
        let result = hits_result(vec![hit("1", json!({}))]);
        let mut rule = build(YAML, WhitelistRule::from_envelope);
        assert!(rule.evaluate(&result, now()).unwrap().triggered);

        let mut lenient = build(&format!("{}ignore_null: true\n", YAML), WhitelistRule::from_envelope);
        assert!(!lenient.evaluate(&result, now()).unwrap().triggered);
    }

    #[test]
    fn array_field_needs_every_element_allowed() {
        let mut rule = build(YAML, WhitelistRule::from_envelope);
        let allowed = hits_result(vec![hit("1", json!({"geo": {"country": ["DE", "NL"]}}))]);
        assert!(!rule.evaluate(&allowed, now()).unwrap().triggered);

        let mixed = hits_result(vec![hit("2", json!({"geo": {"country": ["DE", "KP"]}}))]);
        let m = rule.evaluate(&mixed, now()).unwrap();
        assert!(m.triggered);
        assert_eq!(m.context.current.as_deref(), Some("KP"));
    }
}
