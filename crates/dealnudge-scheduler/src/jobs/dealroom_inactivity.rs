//! Nudges both parties of a dealroom that has gone quiet.

use chrono::{DateTime, Utc};
use dealnudge_core::{
    ActivityWindow, BatchMode, CandidateEntity, EntityKind, PacingMode, Recipient, RecipientRole,
};
use serde_json::json;

use super::{JobPolicy, JobSettings, first_name_or};

/// Deal stages that are still in motion.
const ACTIVE_STATES: &[&str] = &[
    "DISCOVERY",
    "NDA_SIGNED",
    "INITIAL_REVIEW",
    "DUE_DILIGENCE",
    "NEGOTIATION",
    "LOI_PENDING",
    "LOI_SIGNED",
    "UNDER_CONTRACT",
];

pub struct DealroomInactivity {
    settings: JobSettings,
}

impl DealroomInactivity {
    pub const NAME: &'static str = "dealroom-inactivity";

    pub fn new(settings: JobSettings) -> Self {
        Self { settings }
    }

    pub fn default_settings() -> JobSettings {
        JobSettings {
            enabled: true,
            lock_key: 1003,
            threshold_days: 7,
            min_days_between: 7,
            max_notifications: Some(3),
            rate_limit_per_minute: 100,
            batch_mode: BatchMode::Capped,
            pacing: PacingMode::Spaced,
        }
    }
}

impl Default for DealroomInactivity {
    fn default() -> Self {
        Self::new(Self::default_settings())
    }
}

impl JobPolicy for DealroomInactivity {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Nudge buyer and seller when an active dealroom goes quiet"
    }

    fn settings(&self) -> &JobSettings {
        &self.settings
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Dealroom
    }

    fn states(&self) -> &'static [&'static str] {
        ACTIVE_STATES
    }

    fn window(&self) -> ActivityWindow {
        ActivityWindow::IdleFor {
            days: self.settings.threshold_days,
        }
    }

    fn parties_per_entity(&self) -> u32 {
        2
    }

    fn message(
        &self,
        entity: &CandidateEntity,
        recipient: &Recipient,
        now: DateTime<Utc>,
    ) -> (String, serde_json::Value) {
        let other_role = recipient.role.counterpart();
        let fallback = match other_role {
            RecipientRole::Buyer => "the buyer",
            RecipientRole::Seller => "the seller",
        };
        (
            "dealroom-inactivity-nudge".into(),
            json!({
                "first_name": recipient.first_name,
                "role": recipient.role.as_str().to_uppercase(),
                "counterparty_name": first_name_or(entity.recipient(other_role), fallback),
                "listing_title": entity.attr_str("listing_title").unwrap_or("your deal"),
                "dealroom_id": entity.id,
                "days_inactive": entity.days_since_activity(now),
            }),
        )
    }
}
