//! Job policies: what each sweep selects and what it says.
//!
//! The engine (lock, eligibility, dispatch, pacing) is shared; a policy only
//! supplies the selection predicate, the per-job safeguards, and the
//! template parameters for each recipient.

mod dealroom_inactivity;
mod draft_reminder;
mod metrics_expiration;
mod profile_reminder;
mod registry;
mod weekly_digest;

pub use dealroom_inactivity::DealroomInactivity;
pub use draft_reminder::DraftReminder;
pub use metrics_expiration::MetricsExpiration;
pub use profile_reminder::{ProfileReminder, profile_completeness};
pub use registry::JobRegistry;
pub use weekly_digest::WeeklyDigest;

use chrono::{DateTime, Utc};
use dealnudge_core::{
    ActivityWindow, BatchMode, CandidateEntity, EntityKind, JobOverrides, LockKey, PacingMode,
    Recipient,
};
use serde::Serialize;

use crate::dispatch::Dispatch;

/// Tunables shared by every job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSettings {
    pub enabled: bool,
    /// Must be unique across all jobs sharing a lock store.
    pub lock_key: i64,
    /// Meaning depends on the job's window (idle for / active within / expires within).
    pub threshold_days: u32,
    pub min_days_between: u32,
    /// `None` = no per-entity cap.
    pub max_notifications: Option<u32>,
    pub rate_limit_per_minute: u32,
    pub batch_mode: BatchMode,
    pub pacing: PacingMode,
}

impl JobSettings {
    pub fn apply(&mut self, overrides: &JobOverrides) {
        if let Some(enabled) = overrides.enabled {
            self.enabled = enabled;
        }
        if let Some(key) = overrides.lock_key {
            self.lock_key = key;
        }
        if let Some(days) = overrides.threshold_days {
            self.threshold_days = days;
        }
        if let Some(days) = overrides.min_days_between {
            self.min_days_between = days;
        }
        if let Some(max) = overrides.max_notifications {
            self.max_notifications = if max == 0 { None } else { Some(max) };
        }
        if let Some(rate) = overrides.rate_limit_per_minute {
            self.rate_limit_per_minute = rate.max(1);
        }
        if let Some(mode) = overrides.batch_mode {
            self.batch_mode = mode;
        }
        if let Some(pacing) = overrides.pacing {
            self.pacing = pacing;
        }
    }

    /// Candidate cap for one run: one minute of sends when capped.
    pub fn batch_limit(&self, parties_per_entity: u32) -> Option<usize> {
        match self.batch_mode {
            BatchMode::Capped => {
                let per_entity = parties_per_entity.max(1);
                Some((self.rate_limit_per_minute / per_entity).max(1) as usize)
            }
            BatchMode::Paced => None,
        }
    }
}

/// A scheduled notification sweep.
pub trait JobPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn settings(&self) -> &JobSettings;

    fn entity_kind(&self) -> EntityKind;

    fn states(&self) -> &'static [&'static str];

    fn window(&self) -> ActivityWindow;

    /// How many parties one entity notifies; scales the batch cap.
    fn parties_per_entity(&self) -> u32 {
        1
    }

    /// Extra job-specific predicate applied after the store query. The batch
    /// cap is applied only to candidates it accepts.
    fn accepts(&self, _entity: &CandidateEntity) -> bool {
        true
    }

    /// Template name and parameters for one recipient of one entity.
    fn message(
        &self,
        entity: &CandidateEntity,
        recipient: &Recipient,
        now: DateTime<Utc>,
    ) -> (String, serde_json::Value);

    /// Turn the selected candidates into dispatches, in processing order.
    fn plan(&self, candidates: &[CandidateEntity], now: DateTime<Utc>) -> Vec<Dispatch> {
        let mut dispatches = Vec::new();
        for entity in candidates {
            let mut recipients: Vec<&Recipient> = entity.recipients.iter().collect();
            recipients.sort_by_key(|r| r.role);
            for recipient in recipients {
                let (template, params) = self.message(entity, recipient, now);
                dispatches.push(Dispatch::single(&entity.id, recipient, &template, params));
            }
        }
        dispatches
    }

    fn lock_key(&self) -> LockKey {
        LockKey::new(self.name(), self.settings().lock_key)
    }
}

/// First name, or `fallback` when the profile has none.
pub(crate) fn first_name_or(recipient: Option<&Recipient>, fallback: &str) -> String {
    recipient
        .and_then(|r| r.first_name.clone())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
