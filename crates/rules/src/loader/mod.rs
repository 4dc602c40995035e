//! Filesystem rule loader.
//!
//! Scans the rules directory for YAML files and materializes each one
//! through the [`RuleRegistry`](crate::registry::RuleRegistry).

mod core;
mod error;


pub use self::core::{LoadedRules, RuleLoader};
pub use self::error::{LoadResult, LoadStatus};
