//! YAML rule definitions and evaluation for the lookout monitoring engine.
//!
//! This crate provides:
//! - Two-pass YAML decoding of rule files (`type` tag first, then parameters)
//! - Twelve rule types behind the [`Rule`] contract and its capability traits
//! - A backend-neutral [`QueryDescriptor`] that serializes to a search body
//! - Normalization of raw search responses into [`NormalizedResult`]
//! - Time-window bookkeeping for stateful rules
//! - A filesystem [`RuleLoader`] built on the [`RuleRegistry`]

pub mod error;
pub mod loader;
pub mod query;
pub mod registry;
pub mod result;
pub mod rule;
pub mod schema;
pub mod variants;
pub mod window;

pub use error::{Result, RuleError};
pub use loader::{LoadResult, LoadStatus, LoadedRules, RuleLoader};
pub use query::QueryDescriptor;
pub use registry::RuleRegistry;
pub use result::{normalize, Hit, NormalizedResult};
pub use rule::{
    AggregationRule, DualRule, HitsRule, MatchContext, MatchResult, QueryContext, Rule, RuleHandle,
};
pub use schema::{RuleCommon, RuleType};
