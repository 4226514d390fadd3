//! Dispatch loop. One paced send attempt per planned dispatch; failures stay
//! inside their iteration and history is committed per entity.

use dealnudge_core::{
    CandidateEntity, Clock, EntityStore, NotificationHistory, NotificationSender, Recipient,
};
use futures::FutureExt;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;

use crate::lock::LeaseKeeper;
use crate::rate_limit::RateLimiter;
use crate::summary::{DispatchOutcome, RunSummary, StopReason};

/// One planned send: a recipient, what to tell them, and which entities a
/// confirmed send accounts for.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub entity_ids: Vec<String>,
    pub recipient: Recipient,
    pub template: String,
    pub params: serde_json::Value,
}

impl Dispatch {
    pub fn single(entity_id: &str, recipient: &Recipient, template: &str, params: serde_json::Value) -> Self {
        Self {
            entity_ids: vec![entity_id.to_string()],
            recipient: recipient.clone(),
            template: template.to_string(),
            params,
        }
    }
}

/// Reason a recipient is skipped without a send attempt.
pub fn skip_reason(recipient: &Recipient) -> Option<String> {
    if !recipient.verified {
        return Some("email not verified".into());
    }
    let email = recipient.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Some(format!("invalid address '{email}'"));
    }
    None
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

pub struct Dispatcher<'a> {
    pub job: &'a str,
    pub sender: &'a dyn NotificationSender,
    pub store: &'a dyn EntityStore,
    pub clock: &'a dyn Clock,
    pub limiter: &'a mut RateLimiter,
    pub lease: &'a mut LeaseKeeper,
    pub cancel: &'a CancellationToken,
    pub record_history: bool,
}

impl Dispatcher<'_> {
    /// Work through `dispatches` in order. Never fails: every per-dispatch
    /// problem ends up in `summary`.
    pub async fn run(
        mut self,
        candidates: &[CandidateEntity],
        dispatches: Vec<Dispatch>,
        summary: &mut RunSummary,
    ) {
        let histories: HashMap<&str, &NotificationHistory> = candidates
            .iter()
            .map(|c| (c.id.as_str(), &c.history))
            .collect();
        let mut stamped: HashSet<String> = HashSet::new();
        summary.dispatches = dispatches.len();

        for dispatch in dispatches {
            if self.cancel.is_cancelled() {
                tracing::warn!("🛑 [{}] Cancelled, stopping before next dispatch", self.job);
                summary.stopped = Some(StopReason::Cancelled);
                break;
            }

            let outcome = match self.attempt(&dispatch).await {
                Ok(outcome) => outcome,
                Err(reason) => {
                    tracing::warn!("🛑 [{}] Stopping mid-batch: {reason:?}", self.job);
                    summary.stopped = Some(reason);
                    break;
                }
            };
            let to = &dispatch.recipient.email;
            let ids = dispatch.entity_ids.join(",");
            match &outcome {
                DispatchOutcome::Sent => {
                    tracing::info!("✅ [{}] Sent {} to {to} ({ids})", self.job, dispatch.template);
                }
                DispatchOutcome::Skipped(reason) => {
                    tracing::info!("⏭️ [{}] Skipped {to} ({ids}): {reason}", self.job);
                }
                DispatchOutcome::Error(msg) => {
                    tracing::warn!("❌ [{}] Failed to send to {to} ({ids}): {msg}", self.job);
                }
            }
            summary.record(dispatch.recipient.role.as_str(), &outcome);

            if outcome == DispatchOutcome::Sent {
                self.stamp(&dispatch, &histories, &mut stamped, summary).await;
            }
        }
    }

    /// Skip, or wait for a slot and send. `Err` means the run must stop
    /// without sending.
    async fn attempt(&mut self, dispatch: &Dispatch) -> Result<DispatchOutcome, StopReason> {
        if let Some(reason) = skip_reason(&dispatch.recipient) {
            return Ok(DispatchOutcome::Skipped(reason));
        }

        tokio::select! {
            _ = self.limiter.acquire_slot() => {}
            _ = self.cancel.cancelled() => return Err(StopReason::Cancelled),
        }
        if !self.lease.keep_alive().await {
            return Err(StopReason::LockLost);
        }

        let send = self
            .sender
            .send(&dispatch.recipient.email, &dispatch.template, &dispatch.params);
        let outcome = match AssertUnwindSafe(send).catch_unwind().await {
            Ok(Ok(())) => DispatchOutcome::Sent,
            Ok(Err(e)) => DispatchOutcome::Error(format!("{}: {e}", dispatch.recipient.email)),
            Err(panic) => DispatchOutcome::Error(format!(
                "{}: sender panicked: {}",
                dispatch.recipient.email,
                panic_message(panic.as_ref())
            )),
        };
        Ok(outcome)
    }

    /// Commit history for every entity the send covered, once per run.
    async fn stamp(
        &self,
        dispatch: &Dispatch,
        histories: &HashMap<&str, &NotificationHistory>,
        stamped: &mut HashSet<String>,
        summary: &mut RunSummary,
    ) {
        let now = self.clock.now();
        for id in &dispatch.entity_ids {
            if !stamped.insert(id.clone()) || !self.record_history {
                continue;
            }
            let update = histories
                .get(id.as_str())
                .map(|h| h.after_send(now))
                .unwrap_or_else(|| NotificationHistory::default().after_send(now));
            if let Err(e) = self.store.update(id, &update).await {
                tracing::error!("💾 [{}] Sent but could not record history for {id}: {e}", self.job);
                summary.history_write_failures += 1;
                summary
                    .error_messages
                    .push(format!("{id}: history not recorded: {e}"));
            }
        }
    }
}
