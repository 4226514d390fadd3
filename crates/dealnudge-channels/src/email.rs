//! SMTP email sender (async lettre, STARTTLS). Works with Gmail, Outlook,
//! SES and custom relays.

use async_trait::async_trait;
use dealnudge_core::config::EmailSenderConfig;
use dealnudge_core::{DealNudgeError, NotificationSender, Result};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

use crate::render::render;

pub struct EmailSender {
    from: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailSender {
    pub fn new(config: EmailSenderConfig) -> Result<Self> {
        if config.smtp_host.trim().is_empty() {
            return Err(DealNudgeError::Config("sender.email.smtp_host is required".into()));
        }
        if config.from_address.trim().is_empty() {
            return Err(DealNudgeError::Config("sender.email.from_address is required".into()));
        }

        let from_name = config.from_name.as_deref().unwrap_or("DealNudge");
        let from: Mailbox = format!("{from_name} <{}>", config.from_address)
            .parse()
            .map_err(|e| DealNudgeError::Config(format!("Invalid from address: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| DealNudgeError::Channel(format!("SMTP relay: {e}")))?
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(config.username, config.password));
        }

        Ok(Self {
            from,
            mailer: builder.build(),
        })
    }

    fn build(&self, to: &str, template: &str, params: &serde_json::Value) -> Result<Message> {
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| DealNudgeError::Channel(format!("Invalid to '{to}': {e}")))?;
        let rendered = render(template, params);
        Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(rendered.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(rendered.body)
            .map_err(|e| DealNudgeError::Channel(format!("Build email: {e}")))
    }
}

#[async_trait]
impl NotificationSender for EmailSender {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, to: &str, template: &str, params: &serde_json::Value) -> Result<()> {
        let email = self.build(to, template, params)?;
        self.mailer
            .send(email)
            .await
            .map_err(|e| DealNudgeError::Channel(format!("SMTP send: {e}")))?;
        tracing::debug!("📤 Email '{template}' sent to: {to}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EmailSenderConfig {
        EmailSenderConfig {
            smtp_host: "smtp.example.com".into(),
            from_address: "nudges@example.com".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_requires_host_and_from() {
        let mut missing_host = config();
        missing_host.smtp_host.clear();
        assert!(EmailSender::new(missing_host).is_err());

        let mut missing_from = config();
        missing_from.from_address.clear();
        assert!(EmailSender::new(missing_from).is_err());
    }

    #[tokio::test]
    async fn test_builds_message() {
        let sender = EmailSender::new(config()).unwrap();
        let email = sender
            .build("buyer@example.com", "buyer-profile-reminder", &serde_json::json!({}))
            .unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Subject: Complete your buyer profile"));
        assert!(raw.contains("DealNudge <nudges@example.com>"));
    }

    #[tokio::test]
    async fn test_invalid_recipient_fails_before_connecting() {
        let sender = EmailSender::new(config()).unwrap();
        let err = sender
            .send("not-an-address", "buyer-profile-reminder", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid to"));
    }
}
