//! Chat incoming-webhook notifier for Slack and Google Chat.
//!
//! Both services accept a JSON object with a single `text` field, so one
//! notifier serves either; [`ChatKind`] only affects the channel name.

use std::fmt;

use crate::traits::{Notification, Notifier, NotifyError};

/// Which chat service a webhook URL belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Slack,
    GoogleChat,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Slack => "slack",
            ChatKind::GoogleChat => "google_chat",
        }
    }
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Posts `{"text": <body>}` to a chat incoming-webhook URL.
///
/// Environment variable references (`${VAR_NAME}`) in the URL are resolved
/// at construction time so secrets can stay out of rule files.
#[derive(Debug)]
pub struct ChatWebhookNotifier {
    kind: ChatKind,
    /// Target URL (env vars already resolved).
    url: String,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl ChatWebhookNotifier {
    /// Create a notifier for `url`.
    ///
    /// Missing env vars and empty URLs produce [`NotifyError::Config`].
    pub fn new(kind: ChatKind, url: &str) -> Result<Self, NotifyError> {
        Self::with_client(kind, url, reqwest::Client::new())
    }

    /// Same as [`new`](Self::new) but reusing an existing client.
    pub fn with_client(
        kind: ChatKind,
        url: &str,
        client: reqwest::Client,
    ) -> Result<Self, NotifyError> {
        let url = resolve_env_vars(url)?;
        if url.trim().is_empty() {
            return Err(NotifyError::Config(format!("{kind} webhook URL is empty")));
        }
        Ok(Self { kind, url, client })
    }

    pub fn kind(&self) -> ChatKind {
        self.kind
    }

    fn payload(notification: &Notification) -> serde_json::Value {
        serde_json::json!({ "text": notification.body })
    }
}

#[async_trait::async_trait]
impl Notifier for ChatWebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&Self::payload(notification))
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(
                channel = self.kind.as_str(),
                %status,
                body = %body_text,
                "webhook returned non-2xx status"
            );
            return Err(NotifyError::Config(format!(
                "{} webhook returned {status}: {body_text}",
                self.kind
            )));
        }

        tracing::debug!(channel = self.kind.as_str(), %status, "webhook notification delivered");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        self.kind.as_str()
    }
}

/// Resolve `${VAR_NAME}` patterns in a string using `std::env::var`.
///
/// Returns an error if a referenced variable is not set.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, NotifyError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if !closed {
                return Err(NotifyError::Config(format!(
                    "unclosed env var reference in: {input}"
                )));
            }
            let value = std::env::var(&var_name)
                .map_err(|_| NotifyError::Config(format!("env var not found: {var_name}")))?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("LOOKOUT_WEBHOOK_TEST_TOKEN", "T000/B000/XXX");
        let result =
            resolve_env_vars("https://hooks.slack.com/services/${LOOKOUT_WEBHOOK_TEST_TOKEN}")
                .unwrap();
        assert_eq!(result, "https://hooks.slack.com/services/T000/B000/XXX");
        std::env::remove_var("LOOKOUT_WEBHOOK_TEST_TOKEN");
    }

    #[test]
    fn resolve_env_vars_missing() {
        match resolve_env_vars("https://${ABSOLUTELY_NOT_SET_12345}/hook").unwrap_err() {
            NotifyError::Config(msg) => assert!(msg.contains("ABSOLUTELY_NOT_SET_12345")),
            other => panic!("expected Config error, got: {other:?}"),
        }
    }

    #[test]
    fn resolve_env_vars_unclosed() {
        match resolve_env_vars("https://${UNCLOSED/hook").unwrap_err() {
            NotifyError::Config(msg) => assert!(msg.contains("unclosed")),
            other => panic!("expected Config error, got: {other:?}"),
        }
    }

    #[test]
    fn resolve_env_vars_no_vars() {
        let result = resolve_env_vars("https://chat.googleapis.com/v1/spaces/X/messages").unwrap();
        assert_eq!(result, "https://chat.googleapis.com/v1/spaces/X/messages");
    }

    #[test]
    fn empty_url_is_config_error() {
        let err = ChatWebhookNotifier::new(ChatKind::Slack, "  ").unwrap_err();
        assert!(matches!(err, NotifyError::Config(_)));
    }

    #[test]
    fn channel_name_follows_kind() {
        let slack = ChatWebhookNotifier::new(ChatKind::Slack, "https://example.com/s").unwrap();
        let chat = ChatWebhookNotifier::new(ChatKind::GoogleChat, "https://example.com/g").unwrap();
        assert_eq!(slack.channel_name(), "slack");
        assert_eq!(chat.channel_name(), "google_chat");
    }

    #[test]
    fn payload_is_text_only() {
        let n = Notification {
            subject: "ignored".into(),
            body: "Rule login-burst triggered: key=alice count=20".into(),
            metadata: HashMap::new(),
        };
        assert_eq!(
            ChatWebhookNotifier::payload(&n),
            serde_json::json!({"text": "Rule login-burst triggered: key=alice count=20"})
        );
    }
}
