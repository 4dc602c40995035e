//! SMTP email notifier via `lettre` with TLS support.
//!
//! Delivers alerts as plain-text emails to the recipients listed in a rule.
//! Supports STARTTLS, implicit TLS (port 465) and unencrypted relays.

use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};

use crate::traits::{Notification, Notifier, NotifyError};

/// Server-side SMTP settings shared by every email channel.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    /// Defaults to 587; 465 always uses implicit TLS.
    pub port: Option<u16>,
    /// Sender, e.g. `"Lookout <lookout@example.com>"`.
    pub from: String,
    /// STARTTLS on ports other than 465. `false` sends in the clear.
    pub tls: bool,
    pub credentials: Option<(String, String)>,
}

impl SmtpSettings {
    /// Settings with credentials from `SMTP_USERNAME` / `SMTP_PASSWORD`
    /// when both are set.
    pub fn new(host: impl Into<String>, port: Option<u16>, from: impl Into<String>, tls: bool) -> Self {
        let credentials = match (std::env::var("SMTP_USERNAME"), std::env::var("SMTP_PASSWORD")) {
            (Ok(user), Ok(pass)) => Some((user, pass)),
            _ => None,
        };
        Self { host: host.into(), port, from: from.into(), tls, credentials }
    }
}

/// Sends alerts as emails via SMTP.
#[derive(Debug)]
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

fn mailbox(addr: &str) -> Result<Mailbox, NotifyError> {
    addr.trim()
        .parse()
        .map_err(|e: lettre::address::AddressError| NotifyError::Config(format!("{addr}: {e}")))
}

impl EmailNotifier {
    /// Build a notifier delivering to `to` through the configured server.
    ///
    /// Invalid addresses and an empty recipient list are
    /// [`NotifyError::Config`] errors. No connection is made here.
    pub fn new(settings: &SmtpSettings, to: &[String]) -> Result<Self, NotifyError> {
        let from = mailbox(&settings.from)?;
        let to = to.iter().map(|a| mailbox(a)).collect::<Result<Vec<_>, _>>()?;
        if to.is_empty() {
            return Err(NotifyError::Config("at least one recipient is required".to_string()));
        }

        let port = settings.port.unwrap_or(587);
        let host = settings.host.as_str();
        let smtp_err = |e: lettre::transport::smtp::Error| NotifyError::Config(e.to_string());

        let mut builder = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host).map_err(smtp_err)?
        } else if settings.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host).map_err(smtp_err)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        }
        .port(port);

        if let Some((user, pass)) = &settings.credentials {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self { transport: builder.build(), from, to })
    }

    pub fn recipients(&self) -> usize {
        self.to.len()
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let email = self
            .to
            .iter()
            .fold(Message::builder().from(self.from.clone()), |b, r| b.to(r.clone()))
            .subject(&notification.subject)
            .body(notification.body.clone())
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        tracing::debug!(
            channel = "email",
            subject = %notification.subject,
            recipients = self.to.len(),
            "alert email delivered"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}
