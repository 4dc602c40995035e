//! Polling engine: runs loaded rules against OpenSearch on a fixed interval
//! and routes triggered rules to their alert channels.

pub mod alerting;
pub mod backend;
pub mod orchestrator;
pub mod shutdown;

pub use backend::{BackendError, OpenSearchClient, SearchBackend};
pub use orchestrator::{CycleReport, Orchestrator, RuleOutcome, Stage};
