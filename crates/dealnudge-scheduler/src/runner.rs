//! Job runner: the lock → query → dispatch → release lifecycle shared by
//! every job.

use dealnudge_core::{
    Clock, DealNudgeError, EntityStore, LockBackend, LockKey, NotificationSender, Result,
    SystemClock,
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{Dispatcher, panic_message};
use crate::eligibility::find_candidates;
use crate::jobs::JobPolicy;
use crate::lock::{self, LeaseKeeper};
use crate::rate_limit::RateLimiter;
use crate::summary::{RunOutcome, RunSummary, SkipReason};

pub const DEFAULT_LEASE: Duration = Duration::from_secs(600);

/// Runs jobs against one set of collaborators.
pub struct JobRunner {
    lock: Arc<dyn LockBackend>,
    store: Arc<dyn EntityStore>,
    sender: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
    holder: String,
    lease: Duration,
    cancel: CancellationToken,
    record_history: bool,
}

impl JobRunner {
    pub fn new(
        lock: Arc<dyn LockBackend>,
        store: Arc<dyn EntityStore>,
        sender: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            lock,
            store,
            sender,
            clock: Arc::new(SystemClock),
            holder: format!("dealnudge-{}", std::process::id()),
            lease: DEFAULT_LEASE,
            cancel: CancellationToken::new(),
            record_history: true,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Identity written into the lock. Must be unique per process.
    pub fn with_holder(mut self, holder: &str) -> Self {
        self.holder = holder.to_string();
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Dry run: send through whatever sender is configured, but leave
    /// notification history untouched.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.record_history = !dry_run;
        self
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute one run of `job`.
    ///
    /// `Ok(Skipped)` when the job is disabled or another instance holds the
    /// lock. `Err` only for fatal problems (candidate query failure, a panic
    /// outside the per-dispatch isolation). The lock is released on every
    /// path once acquired.
    pub async fn run(&self, job: &dyn JobPolicy) -> Result<RunOutcome> {
        if !job.settings().enabled {
            tracing::info!("⏸️ [{}] Disabled, skipping", job.name());
            return Ok(RunOutcome::skipped(SkipReason::Disabled));
        }

        let key = job.lock_key();
        if !lock::try_lock(self.lock.as_ref(), &key, &self.holder, self.lease).await {
            tracing::info!("🔒 [{}] Lock {key} is held elsewhere, skipping run", job.name());
            return Ok(RunOutcome::skipped(SkipReason::LockNotAcquired));
        }
        tracing::info!("🔐 [{}] Acquired lock {key} as {}", job.name(), self.holder);

        let result = AssertUnwindSafe(self.run_locked(job, &key))
            .catch_unwind()
            .await;

        lock::unlock(self.lock.as_ref(), &key, &self.holder).await;
        tracing::info!("🔓 [{}] Released lock {key}", job.name());

        match result {
            Ok(Ok(summary)) => Ok(RunOutcome::Completed(summary)),
            Ok(Err(e)) => {
                tracing::error!("💥 [{}] Run failed: {e}", job.name());
                Err(e)
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                tracing::error!("💥 [{}] Run panicked: {msg}", job.name());
                Err(DealNudgeError::Job(format!("{} panicked: {msg}", job.name())))
            }
        }
    }

    async fn run_locked(&self, job: &dyn JobPolicy, key: &LockKey) -> Result<RunSummary> {
        let started_at = self.clock.now();
        let mut summary = RunSummary::new(job.name(), started_at);

        let candidates = find_candidates(self.store.as_ref(), job, started_at).await?;
        summary.candidates = candidates.len();
        let dispatches = job.plan(&candidates, started_at);
        tracing::info!(
            "🔎 [{}] {} candidate(s), {} dispatch(es) planned",
            job.name(),
            candidates.len(),
            dispatches.len()
        );

        let settings = job.settings();
        let mut limiter = RateLimiter::new(
            self.clock.clone(),
            settings.rate_limit_per_minute,
            settings.pacing,
        );
        let mut lease = LeaseKeeper::new(
            self.lock.clone(),
            self.clock.clone(),
            key.clone(),
            &self.holder,
            self.lease,
        );

        Dispatcher {
            job: job.name(),
            sender: self.sender.as_ref(),
            store: self.store.as_ref(),
            clock: self.clock.as_ref(),
            limiter: &mut limiter,
            lease: &mut lease,
            cancel: &self.cancel,
            record_history: self.record_history,
        }
        .run(&candidates, dispatches, &mut summary)
        .await;

        summary.paced_ms = u64::try_from(limiter.waited().as_millis()).unwrap_or(u64::MAX);
        summary.finished_at = Some(self.clock.now());
        tracing::info!(
            "📊 [{}] Done: {} sent, {} skipped, {} errors, paced {} ms",
            job.name(),
            summary.sent,
            summary.skipped,
            summary.errors,
            summary.paced_ms
        );
        Ok(summary)
    }

    /// Clear a stuck lock for `job`, whoever holds it.
    pub async fn force_unlock(&self, job: &dyn JobPolicy) -> Result<bool> {
        let key = job.lock_key();
        let removed = self.lock.force_release(&key).await?;
        if removed {
            tracing::warn!("🔓 [{}] Force-released lock {key}", job.name());
        }
        Ok(removed)
    }
}
