//! Domain records shared between the scheduler and its collaborators.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DealNudgeError, Result};

/// What kind of marketplace record a candidate is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Listing,
    Dealroom,
    VerifiedMetric,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Listing => "listing",
            EntityKind::Dealroom => "dealroom",
            EntityKind::VerifiedMetric => "verified_metric",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(EntityKind::User),
            "listing" => Some(EntityKind::Listing),
            "dealroom" => Some(EntityKind::Dealroom),
            "verified_metric" => Some(EntityKind::VerifiedMetric),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the marketplace a recipient is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    Buyer,
    Seller,
}

impl RecipientRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientRole::Buyer => "buyer",
            RecipientRole::Seller => "seller",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buyer" => Some(RecipientRole::Buyer),
            "seller" => Some(RecipientRole::Seller),
            _ => None,
        }
    }

    /// The other party of a two-sided deal.
    pub fn counterpart(&self) -> Self {
        match self {
            RecipientRole::Buyer => RecipientRole::Seller,
            RecipientRole::Seller => RecipientRole::Buyer,
        }
    }
}

impl fmt::Display for RecipientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A person who can be notified about an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub role: RecipientRole,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub verified: bool,
}

impl Recipient {
    pub fn new(role: RecipientRole, email: &str, first_name: Option<&str>, verified: bool) -> Self {
        Self {
            role,
            email: email.to_string(),
            first_name: first_name.map(str::to_string),
            verified,
        }
    }
}

/// Notification bookkeeping persisted on every candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationHistory {
    pub count: u32,
    pub last_notified_at: Option<DateTime<Utc>>,
}

impl NotificationHistory {
    /// History after one more confirmed send at `at`.
    pub fn after_send(&self, at: DateTime<Utc>) -> HistoryUpdate {
        HistoryUpdate {
            notification_count: self.count.saturating_add(1),
            last_notified_at: at,
        }
    }
}

/// The only mutation a sweep performs on a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryUpdate {
    pub notification_count: u32,
    pub last_notified_at: DateTime<Utc>,
}

/// A domain record a sweep may notify about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEntity {
    pub id: String,
    pub kind: EntityKind,
    pub state: String,
    /// Last activity, or creation time for kinds that track no activity.
    pub activity_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: NotificationHistory,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
    /// Free-form fields the job policies read (titles, profile fields, opt-ins).
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl CandidateEntity {
    pub fn new(id: &str, kind: EntityKind, state: &str, activity_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            kind,
            state: state.to_string(),
            activity_at,
            expires_at: None,
            history: NotificationHistory::default(),
            recipients: Vec::new(),
            attributes: serde_json::Map::new(),
        }
    }

    pub fn with_recipient(mut self, recipient: Recipient) -> Self {
        self.recipients.push(recipient);
        self
    }

    pub fn with_attribute(mut self, key: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn with_history(mut self, count: u32, last_notified_at: Option<DateTime<Utc>>) -> Self {
        self.history = NotificationHistory {
            count,
            last_notified_at,
        };
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    pub fn attr_bool(&self, key: &str) -> bool {
        self.attributes
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn recipient(&self, role: RecipientRole) -> Option<&Recipient> {
        self.recipients.iter().find(|r| r.role == role)
    }

    pub fn has_verified_recipient(&self) -> bool {
        self.recipients.iter().any(|r| r.verified)
    }

    /// Whole days elapsed since `activity_at`.
    pub fn days_since_activity(&self, now: DateTime<Utc>) -> i64 {
        (now - self.activity_at).num_days().max(0)
    }
}

/// Time predicate a job applies to a candidate's timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityWindow {
    /// No time restriction.
    Any,
    /// Untouched for at least `days`.
    IdleFor { days: u32 },
    /// Touched within the last `days`.
    ActiveWithin { days: u32 },
    /// Not yet expired, but expiring within `days`.
    ExpiresWithin { days: u32 },
}

impl ActivityWindow {
    pub fn matches(&self, entity: &CandidateEntity, now: DateTime<Utc>) -> bool {
        match *self {
            ActivityWindow::Any => true,
            ActivityWindow::IdleFor { days } => entity.activity_at <= now - days_of(days),
            ActivityWindow::ActiveWithin { days } => entity.activity_at >= now - days_of(days),
            ActivityWindow::ExpiresWithin { days } => match entity.expires_at {
                Some(exp) => exp > now && exp <= now + days_of(days),
                None => false,
            },
        }
    }
}

pub fn days_of(days: u32) -> Duration {
    Duration::days(i64::from(days))
}

/// Selection predicate handed to an [`crate::EntityStore`].
///
/// A candidate matches when its state is in `states` (empty = any state), its
/// timestamps satisfy `window`, it was never notified or was last notified at
/// least `min_gap_days` ago, it has been notified fewer than
/// `max_notifications` times, and it has at least one verified recipient.
/// Soft-deleted records never match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFilter {
    pub kind: EntityKind,
    pub states: Vec<String>,
    pub window: ActivityWindow,
    pub now: DateTime<Utc>,
    pub min_gap_days: u32,
    pub max_notifications: Option<u32>,
    pub limit: Option<usize>,
}

impl CandidateFilter {
    /// Latest `last_notified_at` that still allows another notification.
    pub fn notified_before(&self) -> DateTime<Utc> {
        self.now - days_of(self.min_gap_days)
    }

    pub fn matches(&self, entity: &CandidateEntity) -> bool {
        if entity.kind != self.kind {
            return false;
        }
        if !self.states.is_empty() && !self.states.iter().any(|s| *s == entity.state) {
            return false;
        }
        if !self.window.matches(entity, self.now) {
            return false;
        }
        if let Some(last) = entity.history.last_notified_at {
            if last > self.notified_before() {
                return false;
            }
        }
        if let Some(max) = self.max_notifications {
            if entity.history.count >= max {
                return false;
            }
        }
        entity.has_verified_recipient()
    }
}

/// Identity of a job's mutual-exclusion token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub name: String,
    pub id: i64,
}

impl LockKey {
    pub fn new(name: &str, id: i64) -> Self {
        Self {
            name: name.to_string(),
            id,
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// When a lease taken at `now` runs out.
pub fn lease_expiry(now: DateTime<Utc>, lease: std::time::Duration) -> Result<DateTime<Utc>> {
    Duration::from_std(lease)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| DealNudgeError::Lock(format!("Lease of {}s is out of range", lease.as_secs())))
}
