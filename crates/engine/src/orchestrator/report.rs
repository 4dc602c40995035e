//! Per-cycle outcome reporting.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::info;

/// Step of the per-rule pipeline at which a rule was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// `build_query` failed.
    Query,
    /// The backend call failed or timed out.
    Execute,
    /// Evaluation failed for a reason other than a malformed response.
    Evaluate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Query => "query",
            Stage::Execute => "execute",
            Stage::Evaluate => "evaluate",
        })
    }
}

/// What happened to one rule during a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Triggered { summary: String, delivered: usize, failed: usize },
    Quiet,
    Skipped { stage: Stage, error: String },
}

/// Outcomes for every rule in one cycle, in load order.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub now: DateTime<Utc>,
    pub outcomes: Vec<(String, RuleOutcome)>,
    pub duration_ms: u64,
}

impl CycleReport {
    pub fn outcome(&self, rule: &str) -> Option<&RuleOutcome> {
        self.outcomes.iter().find(|(name, _)| name == rule).map(|(_, o)| o)
    }

    pub fn triggered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RuleOutcome::Triggered { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RuleOutcome::Skipped { .. }))
            .count()
    }

    pub fn log(&self) {
        info!(
            rules = self.outcomes.len(),
            triggered = self.triggered(),
            skipped = self.skipped(),
            duration_ms = self.duration_ms,
            "cycle complete"
        );
    }
}
