//! SQLite entity store and lease lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealnudge_core::{
    ActivityWindow, CandidateEntity, CandidateFilter, Clock, DealNudgeError, EntityKind,
    EntityStore, HistoryUpdate, LockBackend, LockKey, NotificationHistory, Recipient,
    RecipientRole, Result, SystemClock,
};
use dealnudge_core::types::lease_expiry;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::schema::{from_sql_time, migrate, to_sql_time};

const CANDIDATE_SELECT: &str = "SELECT id, kind, state, activity_at, expires_at, attributes, \
     notification_count, last_notified_at FROM candidates c";

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> DealNudgeError + '_ {
    move |e| DealNudgeError::Database(format!("{context}: {e}"))
}

/// Raw candidate row before parsing.
struct CandidateRow {
    id: String,
    kind: String,
    state: String,
    activity_at: String,
    expires_at: Option<String>,
    attributes: String,
    notification_count: u32,
    last_notified_at: Option<String>,
}

fn row_to_candidate(row: &rusqlite::Row) -> rusqlite::Result<CandidateRow> {
    Ok(CandidateRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        state: row.get(2)?,
        activity_at: row.get(3)?,
        expires_at: row.get(4)?,
        attributes: row.get(5)?,
        notification_count: row.get(6)?,
        last_notified_at: row.get(7)?,
    })
}

/// Candidates, recipients, history and job locks in one SQLite database.
///
/// Several processes may open the same file; the lock table then gives
/// cross-process mutual exclusion.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(db_err("DB open error"))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(db_err("DB pragma error"))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("DB open error"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(db_err("DB pragma error"))?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` for lease timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DealNudgeError::Database(format!("Connection poisoned: {e}")))
    }

    /// Insert or replace a candidate and its recipients.
    pub fn upsert(&self, entity: &CandidateEntity) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err("Begin failed"))?;
        tx.execute(
            "INSERT INTO candidates (id, kind, state, activity_at, expires_at, attributes,
                                     notification_count, last_notified_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind, state = excluded.state,
                activity_at = excluded.activity_at, expires_at = excluded.expires_at,
                attributes = excluded.attributes,
                notification_count = excluded.notification_count,
                last_notified_at = excluded.last_notified_at,
                deleted_at = NULL",
            params![
                entity.id,
                entity.kind.as_str(),
                entity.state,
                to_sql_time(entity.activity_at),
                entity.expires_at.map(to_sql_time),
                serde_json::Value::Object(entity.attributes.clone()).to_string(),
                entity.history.count,
                entity.history.last_notified_at.map(to_sql_time),
            ],
        )
        .map_err(db_err("Candidate insert failed"))?;
        tx.execute(
            "DELETE FROM candidate_recipients WHERE candidate_id = ?1",
            params![entity.id],
        )
        .map_err(db_err("Recipient reset failed"))?;
        for r in &entity.recipients {
            tx.execute(
                "INSERT INTO candidate_recipients (candidate_id, role, email, first_name, verified)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![entity.id, r.role.as_str(), r.email, r.first_name, r.verified],
            )
            .map_err(db_err("Recipient insert failed"))?;
        }
        tx.commit().map_err(db_err("Commit failed"))
    }

    /// Mark a candidate deleted. Deleted candidates are never selected.
    pub fn soft_delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE candidates SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                params![to_sql_time(self.clock.now()), id],
            )
            .map_err(db_err("Soft delete failed"))?;
        Ok(changed > 0)
    }

    pub fn get(&self, id: &str) -> Result<Option<CandidateEntity>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{CANDIDATE_SELECT} WHERE id = ?1 AND deleted_at IS NULL"),
                params![id],
                row_to_candidate,
            )
            .optional()
            .map_err(db_err("Candidate lookup failed"))?;
        row.map(|r| hydrate(&conn, r)).transpose()
    }

    /// Current holder of `key` and when its lease ends, if the lease is live.
    pub fn lock_holder(&self, key: &LockKey) -> Result<Option<(String, DateTime<Utc>)>> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT holder, expires_at FROM job_locks WHERE lock_key = ?1 AND expires_at > ?2",
                params![key.id, to_sql_time(self.clock.now())],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err("Lock lookup failed"))?;
        row.map(|(holder, expires)| Ok((holder, from_sql_time(&expires)?)))
            .transpose()
    }
}

/// Attach recipients and parse a raw row.
fn hydrate(conn: &Connection, row: CandidateRow) -> Result<CandidateEntity> {
    let kind = EntityKind::parse(&row.kind)
        .ok_or_else(|| DealNudgeError::Database(format!("Unknown kind '{}' on {}", row.kind, row.id)))?;
    let attributes = match serde_json::from_str::<serde_json::Value>(&row.attributes)? {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };

    let mut stmt = conn
        .prepare_cached(
            "SELECT role, email, first_name, verified FROM candidate_recipients
             WHERE candidate_id = ?1 ORDER BY role",
        )
        .map_err(db_err("Recipient query failed"))?;
    let raw: Vec<(String, String, Option<String>, bool)> = stmt
        .query_map(params![row.id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
        .map_err(db_err("Recipient query failed"))?
        .collect::<rusqlite::Result<_>>()
        .map_err(db_err("Recipient row error"))?;

    let mut recipients = Vec::with_capacity(raw.len());
    for (role, email, first_name, verified) in raw {
        let role = RecipientRole::parse(&role)
            .ok_or_else(|| DealNudgeError::Database(format!("Unknown role '{role}' on {}", row.id)))?;
        recipients.push(Recipient {
            role,
            email,
            first_name,
            verified,
        });
    }

    Ok(CandidateEntity {
        id: row.id,
        kind,
        state: row.state,
        activity_at: from_sql_time(&row.activity_at)?,
        expires_at: row.expires_at.as_deref().map(from_sql_time).transpose()?,
        history: NotificationHistory {
            count: row.notification_count,
            last_notified_at: row.last_notified_at.as_deref().map(from_sql_time).transpose()?,
        },
        recipients,
        attributes,
    })
}

/// WHERE clause and bind values for `filter`.
fn where_clause(filter: &CandidateFilter) -> (String, Vec<Value>) {
    let mut clauses = vec!["c.kind = ?".to_string(), "c.deleted_at IS NULL".to_string()];
    let mut values = vec![Value::Text(filter.kind.as_str().to_string())];

    if !filter.states.is_empty() {
        let marks = vec!["?"; filter.states.len()].join(", ");
        clauses.push(format!("c.state IN ({marks})"));
        values.extend(filter.states.iter().map(|s| Value::Text(s.clone())));
    }

    let now = filter.now;
    match filter.window {
        ActivityWindow::Any => {}
        ActivityWindow::IdleFor { days } => {
            clauses.push("c.activity_at <= ?".into());
            values.push(Value::Text(to_sql_time(now - dealnudge_core::types::days_of(days))));
        }
        ActivityWindow::ActiveWithin { days } => {
            clauses.push("c.activity_at >= ?".into());
            values.push(Value::Text(to_sql_time(now - dealnudge_core::types::days_of(days))));
        }
        ActivityWindow::ExpiresWithin { days } => {
            clauses.push("c.expires_at IS NOT NULL AND c.expires_at > ? AND c.expires_at <= ?".into());
            values.push(Value::Text(to_sql_time(now)));
            values.push(Value::Text(to_sql_time(now + dealnudge_core::types::days_of(days))));
        }
    }

    clauses.push("(c.last_notified_at IS NULL OR c.last_notified_at <= ?)".into());
    values.push(Value::Text(to_sql_time(filter.notified_before())));

    if let Some(max) = filter.max_notifications {
        clauses.push("c.notification_count < ?".into());
        values.push(Value::Integer(i64::from(max)));
    }

    clauses.push(
        "EXISTS (SELECT 1 FROM candidate_recipients r WHERE r.candidate_id = c.id AND r.verified = 1)"
            .into(),
    );

    (clauses.join(" AND "), values)
}

#[async_trait]
impl EntityStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn query(&self, filter: &CandidateFilter) -> Result<Vec<CandidateEntity>> {
        let (clause, mut values) = where_clause(filter);
        let mut sql = format!("{CANDIDATE_SELECT} WHERE {clause} ORDER BY c.activity_at, c.id");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let conn = self.conn()?;
        let rows: Vec<CandidateRow> = {
            let mut stmt = conn.prepare(&sql).map_err(db_err("Candidate query failed"))?;
            stmt.query_map(params_from_iter(values.iter()), row_to_candidate)
                .map_err(db_err("Candidate query failed"))?
                .collect::<rusqlite::Result<_>>()
                .map_err(db_err("Candidate row error"))?
        };
        rows.into_iter().map(|r| hydrate(&conn, r)).collect()
    }

    async fn update(&self, id: &str, update: &HistoryUpdate) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE candidates SET notification_count = ?1, last_notified_at = ?2
                 WHERE id = ?3 AND deleted_at IS NULL",
                params![update.notification_count, to_sql_time(update.last_notified_at), id],
            )
            .map_err(db_err("History update failed"))?;
        if changed == 0 {
            return Err(DealNudgeError::Store(format!("No candidate with id '{id}'")));
        }
        Ok(())
    }
}

fn lease_end(now: DateTime<Utc>, lease: Duration) -> Result<String> {
    Ok(to_sql_time(lease_expiry(now, lease)?))
}

#[async_trait]
impl LockBackend for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn try_acquire(&self, key: &LockKey, holder: &str, lease: Duration) -> Result<bool> {
        let now = self.clock.now();
        let expires_at = lease_end(now, lease)?;
        let conn = self.conn()?;
        // Takes over only when the current lease has expired.
        let changed = conn
            .execute(
                "INSERT INTO job_locks (lock_key, name, holder, acquired_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(lock_key) DO UPDATE SET
                    name = excluded.name, holder = excluded.holder,
                    acquired_at = excluded.acquired_at, expires_at = excluded.expires_at
                 WHERE job_locks.expires_at <= excluded.acquired_at",
                params![key.id, key.name, holder, to_sql_time(now), expires_at],
            )
            .map_err(|e| DealNudgeError::Lock(format!("Acquire {key} failed: {e}")))?;
        Ok(changed == 1)
    }

    async fn renew(&self, key: &LockKey, holder: &str, lease: Duration) -> Result<bool> {
        let now = self.clock.now();
        let expires_at = lease_end(now, lease)?;
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE job_locks SET expires_at = ?1
                 WHERE lock_key = ?2 AND holder = ?3 AND expires_at > ?4",
                params![expires_at, key.id, holder, to_sql_time(now)],
            )
            .map_err(|e| DealNudgeError::Lock(format!("Renew {key} failed: {e}")))?;
        Ok(changed == 1)
    }

    async fn release(&self, key: &LockKey, holder: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM job_locks WHERE lock_key = ?1 AND holder = ?2",
            params![key.id, holder],
        )
        .map_err(|e| DealNudgeError::Lock(format!("Release {key} failed: {e}")))?;
        Ok(())
    }

    async fn force_release(&self, key: &LockKey) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute("DELETE FROM job_locks WHERE lock_key = ?1", params![key.id])
            .map_err(|e| DealNudgeError::Lock(format!("Force release {key} failed: {e}")))?;
        Ok(changed > 0)
    }
}
