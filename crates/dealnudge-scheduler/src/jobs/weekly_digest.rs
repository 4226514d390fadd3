//! Weekly activity digest for opted-in buyers and sellers.

use chrono::{DateTime, Utc};
use dealnudge_core::{
    ActivityWindow, BatchMode, CandidateEntity, EntityKind, PacingMode, Recipient, RecipientRole,
};
use serde_json::json;

use super::{JobPolicy, JobSettings};

pub struct WeeklyDigest {
    settings: JobSettings,
}

impl WeeklyDigest {
    pub const NAME: &'static str = "weekly-digest";

    pub fn new(settings: JobSettings) -> Self {
        Self { settings }
    }

    pub fn default_settings() -> JobSettings {
        JobSettings {
            enabled: true,
            lock_key: 1004,
            threshold_days: 7,
            // A day of slack so a late weekly tick still goes out.
            min_days_between: 6,
            max_notifications: None,
            rate_limit_per_minute: 100,
            batch_mode: BatchMode::Paced,
            pacing: PacingMode::Spaced,
        }
    }
}

impl Default for WeeklyDigest {
    fn default() -> Self {
        Self::new(Self::default_settings())
    }
}

impl JobPolicy for WeeklyDigest {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Send the weekly digest to buyers and sellers active this week"
    }

    fn settings(&self) -> &JobSettings {
        &self.settings
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::User
    }

    fn states(&self) -> &'static [&'static str] {
        &["BUYER", "SELLER"]
    }

    fn window(&self) -> ActivityWindow {
        ActivityWindow::ActiveWithin {
            days: self.settings.threshold_days,
        }
    }

    fn accepts(&self, entity: &CandidateEntity) -> bool {
        entity.attr_bool("weekly_digest")
    }

    fn message(
        &self,
        entity: &CandidateEntity,
        recipient: &Recipient,
        now: DateTime<Utc>,
    ) -> (String, serde_json::Value) {
        let template = match recipient.role {
            RecipientRole::Buyer => "buyer-weekly-digest",
            RecipientRole::Seller => "seller-weekly-digest",
        };
        let week_start = now - dealnudge_core::types::days_of(self.settings.threshold_days);
        (
            template.into(),
            json!({
                "first_name": recipient.first_name,
                "user_id": entity.id,
                "week_start": week_start.to_rfc3339(),
                "week_end": now.to_rfc3339(),
                "digest": entity.attributes.get("digest").cloned().unwrap_or(json!({})),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_opt_in() {
        let job = WeeklyDigest::default();
        let user = CandidateEntity::new("u-1", EntityKind::User, "SELLER", Utc::now());
        assert!(!job.accepts(&user));
        assert!(job.accepts(&user.with_attribute("weekly_digest", json!(true))));
    }

    #[test]
    fn test_template_follows_role() {
        let job = WeeklyDigest::default();
        let now = Utc::now();
        let seller = CandidateEntity::new("u-2", EntityKind::User, "SELLER", now)
            .with_attribute("digest", json!({ "new_inquiries": 4 }))
            .with_recipient(Recipient::new(RecipientRole::Seller, "s@x.io", None, true));
        let dispatches = job.plan(&[seller], now);
        assert_eq!(dispatches[0].template, "seller-weekly-digest");
        assert_eq!(dispatches[0].params["digest"]["new_inquiries"], 4);
    }

    #[test]
    fn test_uncapped_and_paced() {
        let job = WeeklyDigest::default();
        assert_eq!(job.settings().max_notifications, None);
        assert_eq!(job.settings().batch_limit(1), None);
    }
}
