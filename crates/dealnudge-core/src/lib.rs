//! # DealNudge Core
//!
//! Shared vocabulary for the notification sweeps: the error type, the
//! configuration file, the domain records a sweep reads and updates, and the
//! collaborator traits the scheduler is written against.
//!
//! ```text
//! JobRunner ──► LockBackend        (try_acquire / renew / release)
//!     │
//!     ├──────► EntityStore         (query / update)
//!     ├──────► NotificationSender  (send)
//!     └──────► Clock               (now / sleep)
//! ```

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{BatchMode, DealNudgeConfig, JobOverrides, PacingMode};
pub use error::{DealNudgeError, Result};
pub use traits::{Clock, EntityStore, LockBackend, NotificationSender, SystemClock};
pub use types::{
    ActivityWindow, CandidateEntity, CandidateFilter, EntityKind, HistoryUpdate, LockKey,
    NotificationHistory, Recipient, RecipientRole,
};
