//! Virtual clock for driving the sweep engine without wall-clock waits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealnudge_core::Clock;
use std::sync::Mutex;
use std::time::Duration;

/// A clock that only moves when told to. `sleep` advances it instantly.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    slept: Duration,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                slept: Duration::ZERO,
            }),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
    }

    /// Total time spent in `sleep` so far.
    pub fn slept(&self) -> Duration {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).slept
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).now
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
            state.slept += duration;
        }
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_advances_time() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.sleep(Duration::from_secs(90)).await;
        assert_eq!(clock.now() - start, chrono::Duration::seconds(90));
        assert_eq!(clock.slept(), Duration::from_secs(90));

        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.now() - start, chrono::Duration::seconds(100));
        assert_eq!(clock.slept(), Duration::from_secs(90));
    }
}
