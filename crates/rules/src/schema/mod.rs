//! YAML rule file schema.
//!
//! - `RuleEnvelope`: first-pass header (`name`, `type`) over the raw document
//! - `RuleType`: the type tag selecting a rule implementation
//! - `RuleCommon`: fields every rule file carries (index, alert routing, filters)

mod common;
mod envelope;
mod kind;

pub use common::*;
pub use envelope::*;
pub use kind::*;
