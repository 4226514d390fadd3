//! Per-run result aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// sent / skipped / errors for one slice of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub sent: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// How one dispatch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Skipped(String),
    Error(String),
}

/// Why a run stopped before the end of its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Cancelled,
    LockLost,
}

/// Why a run did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    LockNotAcquired,
    Disabled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::LockNotAcquired => write!(f, "lock_not_acquired"),
            SkipReason::Disabled => write!(f, "disabled"),
        }
    }
}

/// The observable output of a completed sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub candidates: usize,
    pub dispatches: usize,
    pub sent: usize,
    pub skipped: usize,
    pub errors: usize,
    pub error_messages: Vec<String>,
    /// Sends that went out but whose history could not be written.
    pub history_write_failures: usize,
    /// Tallies per recipient category (buyer / seller).
    pub by_category: BTreeMap<String, Tally>,
    pub paced_ms: u64,
    pub stopped: Option<StopReason>,
}

impl RunSummary {
    pub fn new(job: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            job: job.to_string(),
            started_at,
            finished_at: None,
            candidates: 0,
            dispatches: 0,
            sent: 0,
            skipped: 0,
            errors: 0,
            error_messages: Vec::new(),
            history_write_failures: 0,
            by_category: BTreeMap::new(),
            paced_ms: 0,
            stopped: None,
        }
    }

    pub fn record(&mut self, category: &str, outcome: &DispatchOutcome) {
        let tally = self.by_category.entry(category.to_string()).or_default();
        match outcome {
            DispatchOutcome::Sent => {
                self.sent += 1;
                tally.sent += 1;
            }
            DispatchOutcome::Skipped(_) => {
                self.skipped += 1;
                tally.skipped += 1;
            }
            DispatchOutcome::Error(msg) => {
                self.errors += 1;
                tally.errors += 1;
                self.error_messages.push(msg.clone());
            }
        }
    }

    pub fn totals(&self) -> Tally {
        Tally {
            sent: self.sent,
            skipped: self.skipped,
            errors: self.errors,
        }
    }
}

/// Result of one invocation of the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunOutcome {
    Completed(RunSummary),
    Skipped(SkippedRun),
}

/// Serialises as `{"skipped": true, "reason": "lock_not_acquired"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRun {
    pub skipped: bool,
    pub reason: SkipReason,
}

impl RunOutcome {
    pub fn skipped(reason: SkipReason) -> Self {
        RunOutcome::Skipped(SkippedRun {
            skipped: true,
            reason,
        })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped(_))
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            RunOutcome::Completed(summary) => Some(summary),
            RunOutcome::Skipped(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_updates_totals_and_category() {
        let mut summary = RunSummary::new("weekly-digest", Utc::now());
        summary.record("buyer", &DispatchOutcome::Sent);
        summary.record("buyer", &DispatchOutcome::Skipped("unverified".into()));
        summary.record("seller", &DispatchOutcome::Error("smtp 550".into()));

        assert_eq!(summary.totals(), Tally { sent: 1, skipped: 1, errors: 1 });
        assert_eq!(summary.by_category["buyer"], Tally { sent: 1, skipped: 1, errors: 0 });
        assert_eq!(summary.by_category["seller"].errors, 1);
        assert_eq!(summary.error_messages, vec!["smtp 550".to_string()]);
    }

    #[test]
    fn test_skipped_serialization() {
        let json = serde_json::to_value(RunOutcome::skipped(SkipReason::LockNotAcquired)).unwrap();
        assert_eq!(json, serde_json::json!({ "skipped": true, "reason": "lock_not_acquired" }));
    }
}
