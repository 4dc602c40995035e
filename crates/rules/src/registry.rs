//! Maps each rule type tag to the constructor that materializes it.

use std::collections::HashMap;

use crate::error::{Result, RuleError};
use crate::rule::RuleHandle;
use crate::schema::{RuleCommon, RuleEnvelope, RuleType};
use crate::variants::*;

/// Builds a rule from its decoded common fields and the full document.
pub type Constructor = fn(RuleCommon, &RuleEnvelope) -> Result<RuleHandle>;

macro_rules! hits {
    ($rule:ty) => {
        (|common: RuleCommon, env: &RuleEnvelope| -> Result<RuleHandle> {
            Ok(RuleHandle::Hits(Box::new(<$rule>::from_envelope(common, env)?)))
        }) as Constructor
    };
}

macro_rules! aggregation {
    ($rule:ty) => {
        (|common: RuleCommon, env: &RuleEnvelope| -> Result<RuleHandle> {
            Ok(RuleHandle::Aggregation(Box::new(<$rule>::from_envelope(common, env)?)))
        }) as Constructor
    };
}

macro_rules! dual {
    ($rule:ty) => {
        (|common: RuleCommon, env: &RuleEnvelope| -> Result<RuleHandle> {
            Ok(RuleHandle::Dual(Box::new(<$rule>::from_envelope(common, env)?)))
        }) as Constructor
    };
}

/// Registry of rule constructors keyed by [`RuleType`].
pub struct RuleRegistry {
    constructors: HashMap<RuleType, Constructor>,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl RuleRegistry {
    pub fn empty() -> Self {
        Self { constructors: HashMap::new() }
    }

    /// All built-in rule types.
    pub fn with_builtin() -> Self {
        let mut r = Self::empty();
        r.register(RuleType::Any, hits!(AnyRule));
        r.register(RuleType::Blacklist, hits!(BlacklistRule));
        r.register(RuleType::Whitelist, hits!(WhitelistRule));
        r.register(RuleType::Frequency, hits!(FrequencyRule));
        r.register(RuleType::Flatline, hits!(FlatlineRule));
        r.register(RuleType::Cardinality, hits!(CardinalityRule));
        r.register(RuleType::Change, hits!(ChangeRule));
        r.register(RuleType::Spike, aggregation!(SpikeRule));
        r.register(RuleType::SpikeAggregation, aggregation!(SpikeAggregationRule));
        r.register(RuleType::PercentageMatch, aggregation!(PercentageMatchRule));
        r.register(RuleType::MetricAggregation, aggregation!(MetricAggregationRule));
        r.register(RuleType::NewTerm, dual!(NewTermRule));
        r
    }

    pub fn register(&mut self, rule_type: RuleType, ctor: Constructor) {
        self.constructors.insert(rule_type, ctor);
    }

    pub fn supports(&self, rule_type: RuleType) -> bool {
        self.constructors.contains_key(&rule_type)
    }

    /// Decode one rule document into a ready-to-run rule.
    ///
    /// Fails with [`RuleError::UnsupportedRuleType`] for an unknown or
    /// unregistered `type`, and [`RuleError::ConfigDecode`] when the
    /// document does not fit that type's parameters.
    pub fn load_rule(&self, yaml: &str) -> Result<RuleHandle> {
        let env = RuleEnvelope::parse(yaml)?;
        let rule_type = env.rule_type()?;
        let ctor = self
            .constructors
            .get(&rule_type)
            .ok_or_else(|| RuleError::UnsupportedRuleType(env.type_tag.clone()))?;
        let common = env.common()?;
        if common.name.trim().is_empty() {
            return Err(RuleError::decode(&env.name, "rule name must not be empty"));
        }
        ctor(common, &env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_type_tag_is_registered() {
        let registry = RuleRegistry::with_builtin();
        for t in RuleType::ALL {
            assert!(registry.supports(t), "{} not registered", t);
        }
    }

    #[test]
    fn loads_into_matching_capability() {
        let registry = RuleRegistry::default();

        let any = registry.load_rule("name: a\nindex: logs\ntype: any\n").unwrap();
        assert!(matches!(any, RuleHandle::Hits(_)));
        assert_eq!(any.rule_type(), RuleType::Any);
        assert_eq!(any.index_target(), "logs");

        let spike = registry
            .load_rule(
                "name: s\nindex: logs\ntype: spike\nspike_height: 3\nspike_type: up\ntimeframe: {hours: 2}\n",
            )
            .unwrap();
        assert!(matches!(spike, RuleHandle::Aggregation(_)));

        let nt = registry
            .load_rule("name: n\nindex: logs\ntype: new_term\nfields: [host]\n")
            .unwrap();
        assert!(nt.is_dual());
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let err = RuleRegistry::default()
            .load_rule("name: x\nindex: logs\ntype: telepathy\n")
            .err()
            .unwrap();
        assert!(matches!(err, RuleError::UnsupportedRuleType(t) if t == "telepathy"));
    }

    #[test]
    fn unregistered_type_is_unsupported() {
        let err = RuleRegistry::empty()
            .load_rule("name: x\nindex: logs\ntype: any\n")
            .err()
            .unwrap();
        assert!(matches!(err, RuleError::UnsupportedRuleType(_)));
    }

    #[test]
    fn parameter_mismatch_is_decode_error() {
        let registry = RuleRegistry::default();
        // num_events must be a number.
        let err = registry
            .load_rule(
                "name: f\nindex: logs\ntype: frequency\nnum_events: lots\ntimeframe: {minutes: 5}\n",
            )
            .err()
            .unwrap();
        assert!(matches!(err, RuleError::ConfigDecode { ref rule, .. } if rule == "f"));

        // blacklist needs compare_key.
        let err = registry
            .load_rule("name: b\nindex: logs\ntype: blacklist\nblacklist: [x]\n")
            .err()
            .unwrap();
        assert!(matches!(err, RuleError::ConfigDecode { .. }));

        // index is required by every rule.
        let err = registry.load_rule("name: c\ntype: any\n").err().unwrap();
        assert!(matches!(err, RuleError::ConfigDecode { .. }));
    }
}
