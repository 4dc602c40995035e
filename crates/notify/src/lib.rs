//! Alert delivery for triggered rules.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable alert channels
//! - Slack / Google Chat webhook and SMTP email notifier implementations
//! - Minijinja template rendering for alert subjects and bodies
//! - Dispatcher that routes an alert to every channel of its rule

pub mod dispatcher;
pub mod email;
pub mod templating;
pub mod traits;
pub mod webhook;

pub use dispatcher::Dispatcher;
pub use email::{EmailNotifier, SmtpSettings};
pub use templating::{AlertContext, RuleContext, TemplateContext, TemplateRenderer};
pub use traits::{DispatchResult, Notification, Notifier, NotifyError};
pub use webhook::{ChatKind, ChatWebhookNotifier};
