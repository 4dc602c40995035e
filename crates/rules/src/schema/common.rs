//! Fields shared by every rule file, plus small parameter types reused by
//! several rule types.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::result::Hit;

fn default_timestamp_field() -> String {
    "@timestamp".to_string()
}

/// Common part of every rule file. Unknown keys are ignored so the
/// type-specific parameters can live in the same document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCommon {
    /// Unique rule name, used in logs and alert messages.
    pub name: String,
    /// Index (or index pattern) the rule queries.
    pub index: String,
    #[serde(rename = "type")]
    pub rule_type: String,
    /// Alert channel kinds (`slack`, `google_chat`, `email`).
    #[serde(default)]
    pub alert: Vec<String>,
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    #[serde(default)]
    pub google_chat_webhook_url: Option<String>,
    /// Email recipients.
    #[serde(default)]
    pub email: Vec<String>,
    #[serde(default)]
    pub alert_subject: Option<String>,
    /// Optional minijinja template for the alert body.
    #[serde(default)]
    pub alert_text: Option<String>,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    /// Extra filter clauses (backend query DSL) applied to every query.
    #[serde(default)]
    pub filter: Vec<serde_json::Value>,
}

/// A duration expressed as `{minutes, hours, days}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeframe {
    #[serde(default)]
    pub minutes: u32,
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub days: u32,
}

impl Timeframe {
    pub fn minutes(minutes: u32) -> Self {
        Self { minutes, ..Self::default() }
    }

    pub fn hours(hours: u32) -> Self {
        Self { hours, ..Self::default() }
    }

    pub fn days(days: u32) -> Self {
        Self { days, ..Self::default() }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.minutes))
            + Duration::hours(i64::from(self.hours))
            + Duration::days(i64::from(self.days))
    }

    pub fn is_zero(&self) -> bool {
        self.duration() == Duration::zero()
    }
}

/// Grouping key: a single field or a compound list of fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryKey {
    Single(String),
    Compound(Vec<String>),
}

/// Group name used when a hit has no value for the grouping key.
pub const MISSING_KEY: &str = "(none)";

impl QueryKey {
    pub fn fields(&self) -> Vec<&str> {
        match self {
            QueryKey::Single(f) => vec![f.as_str()],
            QueryKey::Compound(fs) => fs.iter().map(String::as_str).collect(),
        }
    }

    /// The hit's key value; compound keys are joined with `", "`.
    /// Returns `None` when any component is missing.
    pub fn value_for(&self, hit: &Hit) -> Option<String> {
        let parts: Option<Vec<String>> = self
            .fields()
            .into_iter()
            .map(|f| hit.field_string(f))
            .collect();
        parts.map(|p| p.join(", "))
    }
}

/// Key of a hit under an optional grouping key: `all` when ungrouped,
/// [`MISSING_KEY`] when the hit lacks the field.
pub fn group_key(query_key: Option<&QueryKey>, hit: &Hit) -> String {
    match query_key {
        None => "all".to_string(),
        Some(qk) => qk.value_for(hit).unwrap_or_else(|| MISSING_KEY.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timeframe_resolves_all_units() {
        let tf: Timeframe = serde_yaml::from_str("{minutes: 30, hours: 1, days: 2}").unwrap();
        assert_eq!(tf.duration(), Duration::minutes(30 + 60 + 2 * 24 * 60));
        assert!(!tf.is_zero());
        assert!(Timeframe::default().is_zero());
    }

    #[test]
    fn compound_query_key() {
        let hit = Hit::new(json!({
            "_id": "1",
            "_source": {"user": "alice", "host": {"name": "web-1"}}
        }));

        let single: QueryKey = serde_yaml::from_str("user").unwrap();
        assert_eq!(single.value_for(&hit).as_deref(), Some("alice"));

        let compound: QueryKey = serde_yaml::from_str("[user, host.name]").unwrap();
        assert_eq!(compound.value_for(&hit).as_deref(), Some("alice, web-1"));

        let missing = QueryKey::Single("nope".into());
        assert_eq!(missing.value_for(&hit), None);
        assert_eq!(group_key(Some(&missing), &hit), MISSING_KEY);
        assert_eq!(group_key(None, &hit), "all");
    }

    #[test]
    fn common_fields_ignore_unknown_keys() {
        let common: RuleCommon = serde_yaml::from_str(
            r#"
name: failed-logins
index: auth-*
type: frequency
num_events: 5
alert: [slack]
slack_webhook_url: https://hooks.slack.com/services/X
filter:
  - term: {outcome: failure}
"#,
        )
        .unwrap();
        assert_eq!(common.name, "failed-logins");
        assert_eq!(common.rule_type, "frequency");
        assert_eq!(common.timestamp_field, "@timestamp");
        assert_eq!(common.filter, vec![json!({"term": {"outcome": "failure"}})]);
        assert!(common.email.is_empty());
    }
}
