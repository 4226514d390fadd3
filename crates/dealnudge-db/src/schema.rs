//! SQLite schema.
//!
//! Timestamps are stored as RFC 3339 UTC strings with millisecond precision
//! (`2026-10-16T08:00:00.000Z`) so they compare correctly as text.

use chrono::{DateTime, SecondsFormat, Utc};
use dealnudge_core::{DealNudgeError, Result};
use rusqlite::Connection;

pub const SCHEMA: &str = "
    -- One row per notifiable entity (user, listing, dealroom, verified metric)
    CREATE TABLE IF NOT EXISTS candidates (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,                  -- 'user', 'listing', 'dealroom', 'verified_metric'
        state TEXT NOT NULL,                 -- role, listing status, deal stage, ...
        activity_at TEXT NOT NULL,
        expires_at TEXT,
        attributes TEXT NOT NULL DEFAULT '{}',   -- JSON object
        notification_count INTEGER NOT NULL DEFAULT 0,
        last_notified_at TEXT,
        deleted_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_candidates_sweep
        ON candidates(kind, state, activity_at);

    -- Who gets told about a candidate; at most one per role
    CREATE TABLE IF NOT EXISTS candidate_recipients (
        candidate_id TEXT NOT NULL REFERENCES candidates(id) ON DELETE CASCADE,
        role TEXT NOT NULL,                  -- 'buyer', 'seller'
        email TEXT NOT NULL,
        first_name TEXT,
        verified INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (candidate_id, role)
    );

    -- Lease locks, one row per job lock key
    CREATE TABLE IF NOT EXISTS job_locks (
        lock_key INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        holder TEXT NOT NULL,
        acquired_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );
";

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .map_err(|e| DealNudgeError::Database(format!("Migration failed: {e}")))
}

pub fn to_sql_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn from_sql_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DealNudgeError::Database(format!("Bad timestamp '{raw}': {e}")))
}
