//! Minijinja template rendering for alert messages.
//!
//! A rule's `alert_subject` and `alert_text` are rendered against a
//! [`TemplateContext`] describing the rule and what it matched. Rules
//! without templates get fixed default wording.
//!
//! Templates are arbitrary strings (not pre-registered), so a fresh
//! [`minijinja::Environment`] is created per render call.

use std::collections::HashMap;

use crate::traits::{Notification, NotifyError};

/// Context data available to alert templates.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TemplateContext {
    /// The rule that triggered.
    pub rule: RuleContext,
    /// What the rule matched.
    pub alert: AlertContext,
    /// Hits returned by the triggering query, when known.
    pub hit_count: Option<u64>,
    /// Cycle timestamp in RFC 3339 format.
    pub now: String,
}

/// Rule metadata exposed to templates.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RuleContext {
    pub name: String,
    pub index: String,
    #[serde(rename = "type")]
    pub rule_type: String,
}

/// Match details exposed to templates.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AlertContext {
    /// One-line description of the match.
    pub summary: String,
    pub key: Option<String>,
    pub count: Option<u64>,
    pub previous: Option<String>,
    pub current: Option<String>,
    pub percentage: Option<f64>,
    pub value: Option<f64>,
    pub terms: Vec<String>,
    pub related: Vec<String>,
}

/// Renders alert templates using minijinja.
#[derive(Debug)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Build a configured minijinja environment with custom filters and globals.
    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("round", round_filter);
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);
        env.add_function("env", env_function);
        env
    }

    /// Render a template string with the given context.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Template`] if the template is invalid or
    /// rendering fails.
    pub fn render(&self, template_str: &str, ctx: &TemplateContext) -> Result<String, NotifyError> {
        let env = Self::build_env();
        env.render_str(template_str, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Check template syntax without evaluating it.
    pub fn validate(&self, template_str: &str) -> Result<(), NotifyError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(())
    }

    /// Render the full alert for a rule.
    ///
    /// Without `text`, the body is `Rule <name> triggered: <summary>`.
    /// Without `subject`, the subject is `[lookout] <name> triggered`.
    pub fn notification(
        &self,
        subject: Option<&str>,
        text: Option<&str>,
        ctx: &TemplateContext,
    ) -> Result<Notification, NotifyError> {
        let mut notification = Self::default_notification(ctx);
        if let Some(t) = text {
            notification.body = self.render(t, ctx)?;
        }
        if let Some(t) = subject {
            notification.subject = self.render(t, ctx)?;
        }
        Ok(notification)
    }

    /// The alert with default wording, ignoring any templates.
    pub fn default_notification(ctx: &TemplateContext) -> Notification {
        let mut metadata = HashMap::from([
            ("rule".to_string(), ctx.rule.name.clone()),
            ("rule_type".to_string(), ctx.rule.rule_type.clone()),
        ]);
        if let Some(key) = &ctx.alert.key {
            metadata.insert("key".to_string(), key.clone());
        }
        Notification {
            subject: format!("[lookout] {} triggered", ctx.rule.name),
            body: format!("Rule {} triggered: {}", ctx.rule.name, ctx.alert.summary),
            metadata,
        }
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Custom filter: round a float to N decimal places.
fn round_filter(value: f64, decimals: Option<u32>) -> String {
    let n = decimals.unwrap_or(0);
    format!("{:.prec$}", value, prec = n as usize)
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

/// Global function: read an environment variable by name, empty if unset.
fn env_function(name: String) -> String {
    match std::env::var(&name) {
        Ok(val) => val,
        Err(_) => {
            tracing::warn!(var = %name, "environment variable not found, returning empty string");
            String::new()
        }
    }
}
