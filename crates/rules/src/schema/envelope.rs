//! Rule envelope for lightweight first-pass deserialization.

use serde::de::DeserializeOwned;

use crate::error::{Result, RuleError};

use super::{RuleCommon, RuleType};

/// A parsed rule document whose header (`name`, `type`) has been read.
///
/// Used during two-pass loading: first extract `type` to pick the concrete
/// rule, then decode the same document into that rule's parameter struct.
#[derive(Debug, Clone)]
pub struct RuleEnvelope {
    /// Rule name, or `<unnamed>` when absent (decoding `RuleCommon` reports it).
    pub name: String,
    /// Raw `type` tag; empty when absent.
    pub type_tag: String,
    document: serde_yaml::Value,
}

impl RuleEnvelope {
    pub fn parse(yaml: &str) -> Result<Self> {
        let document: serde_yaml::Value =
            serde_yaml::from_str(yaml).map_err(|e| RuleError::decode("<unnamed>", e))?;
        if !document.is_mapping() {
            return Err(RuleError::decode("<unnamed>", "rule document must be a mapping"));
        }

        let name = document
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("<unnamed>")
            .to_string();
        let type_tag = document
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(Self { name, type_tag, document })
    }

    /// Parse the `type` tag into a typed [`RuleType`].
    pub fn rule_type(&self) -> Result<RuleType> {
        self.type_tag
            .parse()
            .map_err(|_| RuleError::UnsupportedRuleType(self.type_tag.clone()))
    }

    /// Second pass: decode the fields every rule shares.
    pub fn common(&self) -> Result<RuleCommon> {
        self.params()
    }

    /// Second pass: decode the document into a type-specific parameter struct.
    pub fn params<P: DeserializeOwned>(&self) -> Result<P> {
        serde_yaml::from_value(self.document.clone()).map_err(|e| RuleError::decode(&self.name, e))
    }
}
