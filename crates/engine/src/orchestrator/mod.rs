//! The polling loop: every `run_every`, run each loaded rule through
//! query → search → normalize → evaluate → alert.
//!
//! Rules are owned by the orchestrator and processed sequentially, so rule
//! state needs no locking. A failure at any step is logged and skips that
//! rule for the current cycle only.
//!
//! Each rule's last queried window end is kept between cycles, so rules
//! without a timeframe query exactly the span since their previous window.

mod report;


use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use lookout_core::EngineSettings;
use lookout_notify::{Dispatcher, TemplateRenderer};
use lookout_rules::{
    normalize, MatchResult, NormalizedResult, QueryContext, QueryDescriptor, RuleError, RuleHandle,
};

use crate::alerting;
use crate::backend::{BackendError, SearchBackend};

pub use report::{CycleReport, RuleOutcome, Stage};

/// Owns the loaded rules and drives them against a search backend.
pub struct Orchestrator {
    backend: Box<dyn SearchBackend>,
    rules: Vec<RuleHandle>,
    dispatcher: Dispatcher,
    renderer: TemplateRenderer,
    settings: EngineSettings,
    /// Rule name to the end of its last executed query window.
    cursors: HashMap<String, DateTime<Utc>>,
}

/// Borrowed collaborators for one cycle, kept apart from the rules so a
/// rule can be borrowed mutably while they are in use.
struct CycleEnv<'a> {
    backend: &'a dyn SearchBackend,
    dispatcher: &'a Dispatcher,
    renderer: &'a TemplateRenderer,
    query_timeout: Duration,
    ctx: QueryContext,
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}

impl Orchestrator {
    pub fn new(
        backend: Box<dyn SearchBackend>,
        rules: Vec<RuleHandle>,
        dispatcher: Dispatcher,
        settings: EngineSettings,
    ) -> Self {
        Self {
            backend,
            rules,
            dispatcher,
            renderer: TemplateRenderer::new(),
            settings,
            cursors: HashMap::new(),
        }
    }

    pub fn rules(&self) -> &[RuleHandle] {
        &self.rules
    }

    fn query_context(&self, now: DateTime<Utc>) -> QueryContext {
        QueryContext {
            now,
            buffer_time: chrono_duration(self.settings.buffer_time),
            default_lookback: chrono_duration(self.settings.run_every),
            max_hits: self.settings.max_hits,
            since: None,
        }
    }

    /// Run every rule once against the cycle anchor `now`.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let start = Instant::now();
        let env = CycleEnv {
            backend: self.backend.as_ref(),
            dispatcher: &self.dispatcher,
            renderer: &self.renderer,
            query_timeout: self.settings.query_timeout,
            ctx: self.query_context(now),
        };

        let mut outcomes = Vec::with_capacity(self.rules.len());
        for rule in self.rules.iter_mut() {
            let cursor = self.cursors.get(rule.name()).copied();
            let (outcome, cursor) = run_rule(&env, rule, cursor).await;
            if let Some(end) = cursor {
                self.cursors.insert(rule.name().to_string(), end);
            }
            outcomes.push((rule.name().to_string(), outcome));
        }

        CycleReport { now, outcomes, duration_ms: start.elapsed().as_millis() as u64 }
    }

    /// Poll until `shutdown` turns true. A signal during a cycle lets the
    /// cycle finish; a signal during the wait ends it immediately. Cycles
    /// start `run_every` after the previous one finished and never overlap.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            rules = self.rules.len(),
            run_every_secs = self.settings.run_every.as_secs(),
            "polling loop started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.run_cycle(Utc::now()).await.log();

            tokio::select! {
                _ = tokio::time::sleep(self.settings.run_every) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("shutdown channel closed, stopping");
                        break;
                    }
                }
            }
        }
        info!("polling loop stopped");
    }
}

async fn search(
    env: &CycleEnv<'_>,
    query: &QueryDescriptor,
) -> Result<serde_json::Value, BackendError> {
    let body = query.to_body();
    match tokio::time::timeout(env.query_timeout, env.backend.execute(&query.index, &body)).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout(env.query_timeout)),
    }
}

/// Execute and normalize. `Ok(None)` means the response was malformed,
/// which counts as no match.
async fn fetch(
    env: &CycleEnv<'_>,
    rule: &str,
    query: &QueryDescriptor,
) -> Result<Option<NormalizedResult>, BackendError> {
    let raw = search(env, query).await?;
    match normalize(&raw) {
        Ok(result) => Ok(Some(result)),
        Err(e) => {
            warn!(rule, index = %query.index, error = %e, "malformed search response, treating as no match");
            Ok(None)
        }
    }
}

fn skipped(rule: &str, stage: Stage, error: impl ToString) -> RuleOutcome {
    let error = error.to_string();
    warn!(rule, %stage, error = %error, "rule skipped this cycle");
    RuleOutcome::Skipped { stage, error }
}

/// Run one rule and return its outcome with the rule's updated cursor.
///
/// The cursor advances to the window end once the backend has answered.
/// After a failed first search it is pinned to the window start, so the
/// next cycle queries the missed span as well.
async fn run_rule(
    env: &CycleEnv<'_>,
    rule: &mut RuleHandle,
    cursor: Option<DateTime<Utc>>,
) -> (RuleOutcome, Option<DateTime<Utc>>) {
    let name = rule.name().to_string();
    let now = env.ctx.now;
    rule.garbage_collect(now);

    let ctx = QueryContext { since: cursor, ..env.ctx };
    let query = match rule.build_query(&ctx) {
        Ok(q) => q,
        Err(e) => return (skipped(&name, Stage::Query, e), cursor),
    };
    let window = query.time_range.as_ref().map(|r| (r.gte, r.lt));

    match fetch(env, &name, &query).await {
        Ok(current) => {
            let advanced = window.map(|(_, end)| end).or(cursor);
            let outcome = match current {
                Some(current) => evaluate_and_alert(env, rule, &name, &query, current).await,
                None => RuleOutcome::Quiet,
            };
            (outcome, advanced)
        }
        Err(e) => {
            let pinned = cursor.or(window.map(|(start, _)| start));
            (skipped(&name, Stage::Execute, e), pinned)
        }
    }
}

async fn evaluate_and_alert(
    env: &CycleEnv<'_>,
    rule: &mut RuleHandle,
    name: &str,
    query: &QueryDescriptor,
    current: NormalizedResult,
) -> RuleOutcome {
    let now = env.ctx.now;
    debug!(rule = %name, hits = current.hit_count(), total = ?current.total, "search returned");

    let evaluated = match rule {
        RuleHandle::Hits(r) => r.evaluate(&current, now),
        RuleHandle::Aggregation(r) => r.evaluate_aggregations(&current, now),
        RuleHandle::Dual(r) => {
            let previous = match fetch(env, name, &query.shifted_to_previous()).await {
                Ok(Some(p)) => p,
                Ok(None) => return RuleOutcome::Quiet,
                Err(e) => return skipped(name, Stage::Execute, e),
            };
            r.evaluate_dual(&current, &previous)
        }
    };

    let matched: MatchResult = match evaluated {
        Ok(m) => m,
        Err(RuleError::ResponseParse(e)) => {
            warn!(rule = %name, error = %e, "unexpected response shape, treating as no match");
            return RuleOutcome::Quiet;
        }
        Err(e) => return skipped(name, Stage::Evaluate, e),
    };

    if !matched.triggered {
        debug!(rule = %name, "no match");
        return RuleOutcome::Quiet;
    }

    let summary = matched.summary();
    info!(rule = %name, rule_type = %rule.rule_type(), summary = %summary, "rule triggered");

    let ctx = alerting::template_context(rule, &matched, Some(current.hit_count()), now);
    let notification = alerting::render(env.renderer, rule.common(), &ctx);
    let results = env.dispatcher.dispatch(name, &notification).await;
    let delivered = results.iter().filter(|r| r.success).count();

    RuleOutcome::Triggered { summary, delivered, failed: results.len() - delivered }
}
