use std::collections::HashSet;

use serde::Deserialize;

use crate::error::{Result, RuleError};
use crate::query::{Aggregation, QueryDescriptor};
use crate::result::NormalizedResult;
use crate::rule::{DualRule, MatchContext, MatchResult, QueryContext, Rule};
use crate::schema::{QueryKey, RuleCommon, RuleEnvelope, RuleType, Timeframe};

fn default_terms_window() -> Timeframe {
    Timeframe::days(30)
}

fn default_true() -> bool {
    true
}

fn default_terms_size() -> usize {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
struct NewTermParams {
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    query_key: Option<QueryKey>,
    #[serde(default = "default_terms_window")]
    terms_window_size: Timeframe,
    #[serde(default = "default_true")]
    use_keyword_postfix: bool,
    #[serde(default = "default_terms_size")]
    terms_size: usize,
}

/// Compares the term sets of the current window and the adjacent previous
/// window, one terms aggregation per field.
///
/// Triggers when a term present in the previous window is absent from the
/// current one.
pub struct NewTermRule {
    common: RuleCommon,
    params: NewTermParams,
    fields: Vec<String>,
}

impl NewTermRule {
    pub fn from_envelope(common: RuleCommon, env: &RuleEnvelope) -> Result<Self> {
        let params: NewTermParams = env.params()?;
        let fields: Vec<String> = if params.fields.is_empty() {
            params
                .query_key
                .as_ref()
                .map(|k| k.fields().into_iter().map(str::to_string).collect())
                .unwrap_or_default()
        } else {
            params.fields.clone()
        };
        if fields.is_empty() {
            return Err(RuleError::decode(&common.name, "new_term needs fields or query_key"));
        }
        Ok(Self { common, params, fields })
    }

    fn agg_name(i: usize) -> String {
        format!("terms_{}", i)
    }

    fn term_set(&self, result: &NormalizedResult, i: usize) -> Result<HashSet<String>> {
        result
            .aggregation(&Self::agg_name(i))?
            .buckets()?
            .iter()
            .map(|b| b.key())
            .collect()
    }
}

impl Rule for NewTermRule {
    fn common(&self) -> &RuleCommon {
        &self.common
    }

    fn rule_type(&self) -> RuleType {
        RuleType::NewTerm
    }

    fn build_query(&self, ctx: &QueryContext) -> Result<QueryDescriptor> {
        if self.params.terms_window_size.is_zero() {
            return Err(RuleError::query(&self.common.name, "terms_window_size must be greater than zero"));
        }
        let mut q = QueryDescriptor::for_rule(
            &self.common,
            ctx,
            ctx.now,
            self.params.terms_window_size.duration(),
        )
        .size(0);
        for (i, field) in self.fields.iter().enumerate() {
            let field = if self.params.use_keyword_postfix {
                format!("{}.keyword", field)
            } else {
                field.clone()
            };
            q = q.aggregate(Self::agg_name(i), Aggregation::terms(field, self.params.terms_size));
        }
        Ok(q)
    }
}

impl DualRule for NewTermRule {
    fn evaluate_dual(
        &mut self,
        current: &NormalizedResult,
        previous: &NormalizedResult,
    ) -> Result<MatchResult> {
        for (i, field) in self.fields.iter().enumerate() {
            let current_terms = self.term_set(current, i)?;
            let mut missing: Vec<String> = self
                .term_set(previous, i)?
                .into_iter()
                .filter(|t| !current_terms.contains(t))
                .collect();
            if !missing.is_empty() {
                missing.sort();
                return Ok(MatchResult::triggered(MatchContext {
                    key: Some(field.clone()),
                    count: Some(missing.len() as u64),
                    terms: missing,
                    ..Default::default()
                }));
            }
        }
        Ok(MatchResult::quiet())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variants::test_support::*;
    use chrono::Duration;
    use serde_json::json;

    const YAML: &str = r#"
name: user-agents
index: web-*
type: new_term
fields: [user_agent]
"#;

    fn terms(keys: &[&str]) -> NormalizedResult {
        let buckets: Vec<_> = keys.iter().map(|k| json!({"key": k, "doc_count": 1})).collect();
        agg_result(json!({ "terms_0": { "buckets": buckets } }))
    }

    #[test]
    fn term_gone_from_current_window_triggers() {
        let mut rule = build(YAML, NewTermRule::from_envelope);
        let m = rule
            .evaluate_dual(&terms(&["curl", "firefox"]), &terms(&["curl", "firefox", "wget"]))
            .unwrap();
        assert!(m.triggered);
        assert_eq!(m.context.terms, vec!["wget".to_string()]);
    }

    #[test]
    fn term_only_in_current_window_is_quiet() {
        let mut rule = build(YAML, NewTermRule::from_envelope);
        let m = rule
            .evaluate_dual(&terms(&["curl", "brand-new"]), &terms(&["curl"]))
            .unwrap();
        assert!(!m.triggered);
    }

    #[test]
    fn default_window_and_keyword_postfix() {
        let rule = build(YAML, NewTermRule::from_envelope);
        let q = rule.build_query(&ctx()).unwrap();
        assert_eq!(q.time_range.as_ref().unwrap().length(), Duration::days(30));
        assert_eq!(q.aggregations["terms_0"], Aggregation::terms("user_agent.keyword", 10_000));

        let prev = q.shifted_to_previous();
        assert_eq!(prev.time_range.unwrap().gte, now() - Duration::days(60));
    }

    #[test]
    fn query_key_stands_in_for_fields() {
        let rule = build(
            "name: n\nindex: i\ntype: new_term\nquery_key: host\nuse_keyword_postfix: false\nterms_window_size: {days: 7}\n",
            NewTermRule::from_envelope,
        );
        let q = rule.build_query(&ctx()).unwrap();
        assert_eq!(q.aggregations["terms_0"], Aggregation::terms("host", 10_000));
    }
}
