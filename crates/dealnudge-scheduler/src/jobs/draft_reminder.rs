//! Reminds sellers about listings left in draft.

use chrono::{DateTime, Utc};
use dealnudge_core::{
    ActivityWindow, BatchMode, CandidateEntity, EntityKind, PacingMode, Recipient,
};
use serde_json::json;

use super::{JobPolicy, JobSettings};

pub struct DraftReminder {
    settings: JobSettings,
}

impl DraftReminder {
    pub const NAME: &'static str = "draft-reminder";

    pub fn new(settings: JobSettings) -> Self {
        Self { settings }
    }

    pub fn default_settings() -> JobSettings {
        JobSettings {
            enabled: true,
            lock_key: 1002,
            threshold_days: 3,
            min_days_between: 3,
            max_notifications: Some(3),
            rate_limit_per_minute: 100,
            batch_mode: BatchMode::Capped,
            pacing: PacingMode::Spaced,
        }
    }
}

impl Default for DraftReminder {
    fn default() -> Self {
        Self::new(Self::default_settings())
    }
}

impl JobPolicy for DraftReminder {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Remind sellers to finish listings sitting in draft"
    }

    fn settings(&self) -> &JobSettings {
        &self.settings
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Listing
    }

    fn states(&self) -> &'static [&'static str] {
        &["DRAFT"]
    }

    fn window(&self) -> ActivityWindow {
        ActivityWindow::IdleFor {
            days: self.settings.threshold_days,
        }
    }

    fn message(
        &self,
        entity: &CandidateEntity,
        recipient: &Recipient,
        now: DateTime<Utc>,
    ) -> (String, serde_json::Value) {
        (
            "seller-listing-draft-reminder".into(),
            json!({
                "first_name": recipient.first_name,
                "listing_id": entity.id,
                "listing_title": entity.attr_str("title").unwrap_or("your listing"),
                "days_in_draft": entity.days_since_activity(now),
            }),
        )
    }
}
