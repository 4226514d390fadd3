//! Seams between the sweep engine and the outside world.
//!
//! Every trait is object-safe and `Send + Sync` so the runner can hold them
//! as `Arc<dyn ...>` and tests can swap in fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::Result;
use crate::types::{CandidateEntity, CandidateFilter, HistoryUpdate, LockKey};

/// Source of time for everything that compares timestamps or waits.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Where candidate entities live.
///
/// Ids are unique across the whole store, regardless of kind.
#[async_trait]
pub trait EntityStore: Send + Sync {
    fn name(&self) -> &str;

    /// Return the candidates matching `filter`, oldest activity first,
    /// truncated to `filter.limit`. Must have no side effects.
    async fn query(&self, filter: &CandidateFilter) -> Result<Vec<CandidateEntity>>;

    /// Persist new notification bookkeeping for one entity.
    async fn update(&self, id: &str, update: &HistoryUpdate) -> Result<()>;
}

/// Outbound notification channel (email, webhook, ...).
#[async_trait]
pub trait NotificationSender: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one notification. `Err` carries the reason for the operator.
    async fn send(&self, to: &str, template: &str, params: &serde_json::Value) -> Result<()>;
}

/// Shared-store mutual exclusion with leases.
#[async_trait]
pub trait LockBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Non-blocking claim. `Ok(false)` when a live holder exists.
    async fn try_acquire(&self, key: &LockKey, holder: &str, lease: Duration) -> Result<bool>;

    /// Extend a held lease. `Ok(false)` when `holder` no longer owns the lock.
    async fn renew(&self, key: &LockKey, holder: &str, lease: Duration) -> Result<bool>;

    /// Drop the lock if `holder` owns it; a no-op otherwise.
    async fn release(&self, key: &LockKey, holder: &str) -> Result<()>;

    /// Drop the lock whoever holds it. Returns whether a lock was removed.
    async fn force_release(&self, key: &LockKey) -> Result<bool>;
}
