//! Send pacing. Never drops a send, only delays it.

use chrono::{DateTime, Utc};
use dealnudge_core::{Clock, PacingMode};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

const WINDOW: Duration = Duration::from_secs(60);

/// Caps dispatches to `max_per_minute`.
///
/// `Spaced` grants slots at least `60s / max_per_minute` apart.
/// `Windowed` allows bursts but never more than `max_per_minute` grants in
/// any rolling 60 s window.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    max_per_minute: u32,
    mode: PacingMode,
    next_slot_at: Option<DateTime<Utc>>,
    granted: VecDeque<DateTime<Utc>>,
    waited: Duration,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, max_per_minute: u32, mode: PacingMode) -> Self {
        Self {
            clock,
            max_per_minute: max_per_minute.max(1),
            mode,
            next_slot_at: None,
            granted: VecDeque::new(),
            waited: Duration::ZERO,
        }
    }

    /// Gap between two grants in `Spaced` mode.
    pub fn interval(&self) -> Duration {
        WINDOW / self.max_per_minute
    }

    /// Total time callers have been held back.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Wait until a send is allowed, then claim the slot.
    pub async fn acquire_slot(&mut self) {
        match self.mode {
            PacingMode::Spaced => self.acquire_spaced().await,
            PacingMode::Windowed => self.acquire_windowed().await,
        }
    }

    async fn acquire_spaced(&mut self) {
        if let Some(next) = self.next_slot_at {
            let now = self.clock.now();
            if next > now {
                self.wait((next - now).to_std().unwrap_or_default()).await;
            }
        }
        let granted_at = self.clock.now();
        self.next_slot_at = Some(granted_at + to_chrono(self.interval()));
    }

    async fn acquire_windowed(&mut self) {
        loop {
            let now = self.clock.now();
            let window = to_chrono(WINDOW);
            while self.granted.front().is_some_and(|t| *t + window <= now) {
                self.granted.pop_front();
            }
            if self.granted.len() < self.max_per_minute as usize {
                self.granted.push_back(now);
                return;
            }
            let Some(oldest) = self.granted.front().copied() else {
                return;
            };
            let wait = (oldest + window - now).to_std().unwrap_or_default();
            tracing::debug!(
                "⏳ Rate limit reached ({}/min), waiting {:?}",
                self.max_per_minute,
                wait
            );
            self.wait(wait).await;
        }
    }

    async fn wait(&mut self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        self.clock.sleep(duration).await;
        self.waited += duration;
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
