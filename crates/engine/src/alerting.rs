//! Resolves each rule's `alert` list into notifier channels and turns a
//! triggered [`MatchResult`] into a rendered notification.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

use lookout_core::config::SmtpConfig;
use lookout_notify::{
    AlertContext, ChatKind, ChatWebhookNotifier, Dispatcher, EmailNotifier, Notification, Notifier,
    RuleContext, SmtpSettings, TemplateContext, TemplateRenderer,
};
use lookout_rules::{MatchResult, RuleCommon, RuleHandle};

/// Alert channel kinds a rule may list under `alert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Slack,
    GoogleChat,
    Email,
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slack" => Ok(AlertKind::Slack),
            "google_chat" | "googlechat" => Ok(AlertKind::GoogleChat),
            "email" => Ok(AlertKind::Email),
            other => Err(format!("unknown alert type '{}'", other)),
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlertKind::Slack => "slack",
            AlertKind::GoogleChat => "google_chat",
            AlertKind::Email => "email",
        })
    }
}

/// Builds notifier channels from rule settings and the global SMTP config.
pub struct ChannelFactory {
    smtp: Option<SmtpSettings>,
    client: reqwest::Client,
}

impl ChannelFactory {
    pub fn new(smtp: &SmtpConfig) -> Self {
        let smtp = match (&smtp.host, &smtp.from) {
            (Some(host), Some(from)) => {
                Some(SmtpSettings::new(host.clone(), smtp.port, from.clone(), smtp.tls.unwrap_or(true)))
            }
            _ => None,
        };
        Self { smtp, client: reqwest::Client::new() }
    }

    fn channel(&self, kind: AlertKind, common: &RuleCommon) -> Result<Box<dyn Notifier>, String> {
        let chat = |chat_kind: ChatKind, url: &Option<String>| -> Result<Box<dyn Notifier>, String> {
            let url = url
                .as_deref()
                .ok_or_else(|| format!("{} alert without a webhook URL", chat_kind))?;
            ChatWebhookNotifier::with_client(chat_kind, url, self.client.clone())
                .map(|n| Box::new(n) as Box<dyn Notifier>)
                .map_err(|e| e.to_string())
        };

        match kind {
            AlertKind::Slack => chat(ChatKind::Slack, &common.slack_webhook_url),
            AlertKind::GoogleChat => chat(ChatKind::GoogleChat, &common.google_chat_webhook_url),
            AlertKind::Email => {
                let smtp = self
                    .smtp
                    .as_ref()
                    .ok_or_else(|| "email alert but SMTP_HOST / SMTP_FROM are not set".to_string())?;
                EmailNotifier::new(smtp, &common.email)
                    .map(|n| Box::new(n) as Box<dyn Notifier>)
                    .map_err(|e| e.to_string())
            }
        }
    }

    /// Channels for one rule. Unknown kinds and missing targets are logged
    /// and skipped so the remaining channels still deliver.
    pub fn channels_for(&self, common: &RuleCommon) -> Vec<Box<dyn Notifier>> {
        let mut channels = Vec::with_capacity(common.alert.len());
        for raw in &common.alert {
            let built = raw.parse::<AlertKind>().and_then(|kind| self.channel(kind, common));
            match built {
                Ok(channel) => channels.push(channel),
                Err(e) => warn!(rule = %common.name, alert = %raw, error = %e, "skipping alert channel"),
            }
        }
        channels
    }

    /// Dispatcher holding the channels of every loaded rule.
    pub fn dispatcher(&self, rules: &[RuleHandle]) -> Dispatcher {
        let mut dispatcher = Dispatcher::empty();
        for rule in rules {
            dispatcher.set_rule_channels(rule.name(), self.channels_for(rule.common()));
        }
        dispatcher
    }
}

/// Template context for a triggered rule.
pub fn template_context(
    rule: &RuleHandle,
    matched: &MatchResult,
    hit_count: Option<u64>,
    now: DateTime<Utc>,
) -> TemplateContext {
    let m = &matched.context;
    TemplateContext {
        rule: RuleContext {
            name: rule.name().to_string(),
            index: rule.index_target().to_string(),
            rule_type: rule.rule_type().to_string(),
        },
        alert: AlertContext {
            summary: matched.summary(),
            key: m.key.clone(),
            count: m.count,
            previous: m.previous.clone(),
            current: m.current.clone(),
            percentage: m.percentage,
            value: m.value,
            terms: m.terms.clone(),
            related: m.related.clone(),
        },
        hit_count,
        now: now.to_rfc3339_opts(SecondsFormat::Secs, true),
    }
}

/// Render the rule's message. A broken template falls back to the default
/// wording rather than dropping the alert.
pub fn render(renderer: &TemplateRenderer, common: &RuleCommon, ctx: &TemplateContext) -> Notification {
    let subject = common.alert_subject.as_deref();
    let text = common.alert_text.as_deref();
    renderer.notification(subject, text, ctx).unwrap_or_else(|e| {
        warn!(rule = %common.name, error = %e, "alert template failed, using default message");
        TemplateRenderer::default_notification(ctx)
    })
}
