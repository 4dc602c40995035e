//! Rule type tag for two-pass deserialization dispatch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported rule types, selected by the `type` key of a rule file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Any,
    Blacklist,
    Whitelist,
    Frequency,
    Flatline,
    Cardinality,
    Change,
    Spike,
    SpikeAggregation,
    NewTerm,
    PercentageMatch,
    MetricAggregation,
}

impl RuleType {
    pub const ALL: [RuleType; 12] = [
        RuleType::Any,
        RuleType::Blacklist,
        RuleType::Whitelist,
        RuleType::Frequency,
        RuleType::Flatline,
        RuleType::Cardinality,
        RuleType::Change,
        RuleType::Spike,
        RuleType::SpikeAggregation,
        RuleType::NewTerm,
        RuleType::PercentageMatch,
        RuleType::MetricAggregation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Any => "any",
            RuleType::Blacklist => "blacklist",
            RuleType::Whitelist => "whitelist",
            RuleType::Frequency => "frequency",
            RuleType::Flatline => "flatline",
            RuleType::Cardinality => "cardinality",
            RuleType::Change => "change",
            RuleType::Spike => "spike",
            RuleType::SpikeAggregation => "spike_aggregation",
            RuleType::NewTerm => "new_term",
            RuleType::PercentageMatch => "percentage_match",
            RuleType::MetricAggregation => "metric_aggregation",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        RuleType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown rule type: '{}'", s))
    }
}
