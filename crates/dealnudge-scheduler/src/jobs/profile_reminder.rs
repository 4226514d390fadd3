//! Reminds buyers whose profile is mostly empty.

use chrono::{DateTime, Utc};
use dealnudge_core::{
    ActivityWindow, BatchMode, CandidateEntity, EntityKind, PacingMode, Recipient,
};
use serde_json::{Value, json};

use super::{JobPolicy, JobSettings};

/// Buyers at or above this completeness are left alone.
const COMPLETE_ENOUGH_PERCENT: u32 = 80;

const ACCOUNT_FIELDS: &[&str] = &["first_name", "last_name", "email", "email_verified", "phone"];

const BUYER_PROFILE_FIELDS: &[&str] = &[
    "bio",
    "linkedin_url",
    "industry_experience",
    "capital_available_min",
    "target_asset_types",
];

/// Percentage of account and buyer-profile fields that are filled in.
///
/// `email` and `email_verified` come from the user's recipient record;
/// buyer-profile fields are read from the nested `buyer_profile` object.
pub fn profile_completeness(entity: &CandidateEntity) -> u32 {
    let recipient = entity.recipients.first();
    let mut completed = 0usize;

    for field in ACCOUNT_FIELDS {
        let filled = match *field {
            "email" => recipient.is_some_and(|r| !r.email.is_empty()),
            "email_verified" => recipient.is_some_and(|r| r.verified),
            other => entity.attributes.get(other).is_some_and(is_filled),
        };
        if filled {
            completed += 1;
        }
    }

    if let Some(Value::Object(profile)) = entity.attributes.get("buyer_profile") {
        completed += BUYER_PROFILE_FIELDS
            .iter()
            .filter(|f| profile.get(**f).is_some_and(is_filled))
            .count();
    }

    let total = ACCOUNT_FIELDS.len() + BUYER_PROFILE_FIELDS.len();
    ((completed as f64 / total as f64) * 100.0).round() as u32
}

fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

pub struct ProfileReminder {
    settings: JobSettings,
}

impl ProfileReminder {
    pub const NAME: &'static str = "profile-reminder";

    pub fn new(settings: JobSettings) -> Self {
        Self { settings }
    }

    pub fn default_settings() -> JobSettings {
        JobSettings {
            enabled: true,
            lock_key: 1001,
            threshold_days: 0,
            min_days_between: 3,
            max_notifications: Some(3),
            rate_limit_per_minute: 100,
            batch_mode: BatchMode::Capped,
            pacing: PacingMode::Spaced,
        }
    }
}

impl Default for ProfileReminder {
    fn default() -> Self {
        Self::new(Self::default_settings())
    }
}

impl JobPolicy for ProfileReminder {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Remind buyers to complete their profile"
    }

    fn settings(&self) -> &JobSettings {
        &self.settings
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::User
    }

    fn states(&self) -> &'static [&'static str] {
        &["BUYER"]
    }

    fn window(&self) -> ActivityWindow {
        match self.settings.threshold_days {
            0 => ActivityWindow::Any,
            days => ActivityWindow::IdleFor { days },
        }
    }

    fn accepts(&self, entity: &CandidateEntity) -> bool {
        profile_completeness(entity) < COMPLETE_ENOUGH_PERCENT
    }

    fn message(
        &self,
        entity: &CandidateEntity,
        recipient: &Recipient,
        _now: DateTime<Utc>,
    ) -> (String, serde_json::Value) {
        (
            "buyer-profile-reminder".into(),
            json!({
                "first_name": recipient.first_name,
                "completeness": profile_completeness(entity),
                "user_id": entity.id,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealnudge_core::RecipientRole;

    fn buyer() -> CandidateEntity {
        CandidateEntity::new("u-1", EntityKind::User, "BUYER", Utc::now())
            .with_recipient(Recipient::new(RecipientRole::Buyer, "b@x.io", Some("Bo"), true))
    }

    #[test]
    fn test_bare_account_is_twenty_percent() {
        // email + email_verified only
        assert_eq!(profile_completeness(&buyer()), 20);
    }

    #[test]
    fn test_full_profile_is_complete() {
        let entity = buyer()
            .with_attribute("first_name", json!("Bo"))
            .with_attribute("last_name", json!("Diaz"))
            .with_attribute("phone", json!("+1 555 0100"))
            .with_attribute(
                "buyer_profile",
                json!({
                    "bio": "Operator",
                    "linkedin_url": "https://linkedin.example/bo",
                    "industry_experience": "Retail",
                    "capital_available_min": 250000,
                    "target_asset_types": ["saas"],
                }),
            );
        assert_eq!(profile_completeness(&entity), 100);
        assert!(!ProfileReminder::default().accepts(&entity));
    }

    #[test]
    fn test_empty_values_do_not_count() {
        let entity = buyer()
            .with_attribute("first_name", json!(""))
            .with_attribute("phone", Value::Null)
            .with_attribute(
                "buyer_profile",
                json!({ "target_asset_types": [], "capital_available_min": 0, "bio": "x" }),
            );
        assert_eq!(profile_completeness(&entity), 30);
        assert!(ProfileReminder::default().accepts(&entity));
    }

    #[test]
    fn test_lock_key_and_window() {
        let job = ProfileReminder::default();
        assert_eq!(job.window(), ActivityWindow::Any);
        assert_eq!(job.lock_key().id, 1001);
    }
}
