//! # DealNudge Scheduler
//!
//! The sweep engine behind every scheduled notification job:
//! - Lease-based mutual exclusion so overlapping runs never double-send
//! - Eligibility queries with local re-checks of cadence and caps
//! - Rate-limited dispatch with per-recipient failure isolation
//! - Notification history committed only after a confirmed send
//!
//! ## Architecture
//! ```text
//! JobRunner::run(job)
//!   ├── try_lock(job.lock_key)        → skipped if held elsewhere
//!   ├── find_candidates(store, job)   → oldest activity first, capped
//!   ├── job.plan(candidates)          → one Dispatch per recipient
//!   ├── Dispatcher
//!   │     ├── skip unverified / invalid addresses
//!   │     ├── RateLimiter::acquire_slot
//!   │     ├── LeaseKeeper::keep_alive
//!   │     ├── sender.send  (errors + panics isolated)
//!   │     └── store.update (once per entity per run)
//!   └── unlock (always)
//! ```

pub mod clock;
pub mod dispatch;
pub mod eligibility;
pub mod jobs;
pub mod lock;
pub mod rate_limit;
pub mod runner;
pub mod store;
pub mod summary;

#[cfg(test)]
mod testing;

pub use clock::ManualClock;
pub use dispatch::Dispatch;
pub use jobs::{JobPolicy, JobRegistry, JobSettings};
pub use lock::{LeaseKeeper, MemoryLockBackend};
pub use rate_limit::RateLimiter;
pub use runner::JobRunner;
pub use store::FileEntityStore;
pub use summary::{RunOutcome, RunSummary, SkipReason, StopReason, Tally};
