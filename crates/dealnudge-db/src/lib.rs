//! # DealNudge DB
//!
//! Persistence backends for the sweep engine:
//! - [`SqliteStore`]: candidate entities, recipients and notification
//!   history, plus a lease lock table, in one SQLite file
//! - [`PgAdvisoryLock`]: session-scoped Postgres advisory locks for
//!   deployments that already run Postgres

pub mod postgres;
pub mod schema;
pub mod sqlite;

pub use postgres::PgAdvisoryLock;
pub use sqlite::SqliteStore;
