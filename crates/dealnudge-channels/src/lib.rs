//! # DealNudge Channels
//!
//! Outbound [`NotificationSender`] implementations:
//! - `email`: SMTP via lettre (STARTTLS relay)
//! - `webhook`: JSON POST via reqwest, for an external mail service
//! - `log`: dry run, writes what would be sent to the log

pub mod email;
pub mod log;
pub mod render;
pub mod webhook;

pub use email::EmailSender;
pub use log::LogSender;
pub use render::{RenderedMessage, render};
pub use webhook::WebhookSender;

use dealnudge_core::config::{SenderConfig, SenderKind};
use dealnudge_core::{NotificationSender, Result};
use std::sync::Arc;

/// Build the sender selected in the config.
pub fn from_config(config: &SenderConfig) -> Result<Arc<dyn NotificationSender>> {
    let sender: Arc<dyn NotificationSender> = match config.kind {
        SenderKind::Email => Arc::new(EmailSender::new(config.email.clone())?),
        SenderKind::Webhook => Arc::new(WebhookSender::new(&config.webhook)?),
        SenderKind::Log => Arc::new(LogSender::new()),
    };
    tracing::debug!("📮 Using '{}' sender", sender.name());
    Ok(sender)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_log() {
        let sender = from_config(&SenderConfig::default()).unwrap();
        assert_eq!(sender.name(), "log");
    }

    #[test]
    fn test_incomplete_email_config_is_rejected() {
        let config = SenderConfig {
            kind: SenderKind::Email,
            ..Default::default()
        };
        assert!(from_config(&config).is_err());
    }
}
