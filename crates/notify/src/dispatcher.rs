//! Routes alerts to the channels configured for each rule.
//!
//! Channels are registered per rule name when rules are loaded. A failing
//! channel never prevents delivery to the remaining channels.

use std::collections::HashMap;

use crate::traits::{DispatchResult, Notification, Notifier};

/// Dispatches alerts to multiple channels, organized per rule.
#[derive(Default)]
pub struct Dispatcher {
    /// Rule name → notifier channels for that rule.
    rule_channels: HashMap<String, Vec<Box<dyn Notifier>>>,
}

impl Dispatcher {
    pub fn new(rule_channels: HashMap<String, Vec<Box<dyn Notifier>>>) -> Self {
        Self { rule_channels }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Replace all channels for a rule.
    pub fn set_rule_channels(&mut self, rule: impl Into<String>, channels: Vec<Box<dyn Notifier>>) {
        self.rule_channels.insert(rule.into(), channels);
    }

    /// Number of channels registered for a rule.
    pub fn channel_count(&self, rule: &str) -> usize {
        self.rule_channels.get(rule).map_or(0, Vec::len)
    }

    /// Deliver `notification` to every channel of `rule`.
    ///
    /// Returns one result per channel, in registration order.
    pub async fn dispatch(&self, rule: &str, notification: &Notification) -> Vec<DispatchResult> {
        let channels = match self.rule_channels.get(rule) {
            Some(c) if !c.is_empty() => c,
            _ => {
                tracing::warn!(rule, "rule triggered but has no alert channels");
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(channels.len());
        for channel in channels {
            let start = std::time::Instant::now();
            let result = channel.send(notification).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let error = match result {
                Ok(()) => {
                    tracing::info!(
                        rule,
                        channel = channel.channel_name(),
                        duration_ms,
                        "alert delivered"
                    );
                    None
                }
                Err(e) => {
                    tracing::warn!(
                        rule,
                        channel = channel.channel_name(),
                        error = %e,
                        duration_ms,
                        "alert delivery failed"
                    );
                    Some(e.to_string())
                }
            };

            results.push(DispatchResult {
                channel: channel.channel_name().to_string(),
                rule: rule.to_string(),
                success: error.is_none(),
                error,
                duration_ms,
            });
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::NotifyError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MockNotifier {
        name: String,
        send_count: Arc<AtomicUsize>,
        should_fail: bool,
    }

    #[async_trait::async_trait]
    impl Notifier for MockNotifier {
        async fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
            self.send_count.fetch_add(1, Ordering::SeqCst);
            if self.should_fail {
                Err(NotifyError::Config("mock failure".to_string()))
            } else {
                Ok(())
            }
        }
        fn channel_name(&self) -> &str {
            &self.name
        }
    }

    fn mock(name: &str, count: &Arc<AtomicUsize>, should_fail: bool) -> Box<dyn Notifier> {
        Box::new(MockNotifier { name: name.to_string(), send_count: count.clone(), should_fail })
    }

    fn notification() -> Notification {
        Notification {
            subject: "[lookout] heartbeat-missing triggered".to_string(),
            body: "Rule heartbeat-missing triggered: count=0".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn dispatch_to_all_channels() {
        let slack = Arc::new(AtomicUsize::new(0));
        let email = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = Dispatcher::empty();
        dispatcher.set_rule_channels(
            "heartbeat-missing",
            vec![mock("slack", &slack, false), mock("email", &email, false)],
        );

        let results = dispatcher.dispatch("heartbeat-missing", &notification()).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success && r.rule == "heartbeat-missing"));
        assert_eq!(slack.load(Ordering::SeqCst), 1);
        assert_eq!(email.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn partial_failure_doesnt_block() {
        let ok = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = Dispatcher::empty();
        dispatcher.set_rule_channels(
            "r",
            vec![mock("slack", &Arc::new(AtomicUsize::new(0)), true), mock("email", &ok, false)],
        );

        let results = dispatcher.dispatch("r", &notification()).await;
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap_or("").contains("mock failure"));
        assert!(results[1].success);
        assert_eq!(ok.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rule_without_channels_returns_empty() {
        let dispatcher = Dispatcher::empty();
        assert!(dispatcher.dispatch("nonexistent", &notification()).await.is_empty());
        assert_eq!(dispatcher.channel_count("nonexistent"), 0);
    }
}
