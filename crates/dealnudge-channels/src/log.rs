//! Dry-run sender: logs each notification instead of delivering it.

use async_trait::async_trait;
use dealnudge_core::{NotificationSender, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::render::render;

#[derive(Debug, Default)]
pub struct LogSender {
    sent: AtomicUsize,
}

impl LogSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications logged so far.
    pub fn count(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl NotificationSender for LogSender {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, to: &str, template: &str, params: &serde_json::Value) -> Result<()> {
        let message = render(template, params);
        tracing::info!("📝 Would send '{}' to {to}: {}", template, message.subject);
        tracing::debug!("{}", message.body);
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
