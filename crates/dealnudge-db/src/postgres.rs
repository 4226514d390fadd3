//! Postgres advisory locks.
//!
//! A lock is held by the pooled session that took it, so it disappears on
//! its own when the process or connection dies. There is no lease to renew:
//! `renew` only checks the session is still alive.

use async_trait::async_trait;
use dealnudge_core::{DealNudgeError, LockBackend, LockKey, Result};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

fn lock_err(key: &LockKey, action: &str, e: sqlx::Error) -> DealNudgeError {
    DealNudgeError::Lock(format!("{action} {key} failed: {e}"))
}

/// `pg_locks` stores a bigint advisory key as (classid, objid) halves.
fn key_halves(id: i64) -> (i64, i64) {
    (id >> 32, id & 0xffff_ffff)
}

pub struct PgAdvisoryLock {
    pool: PgPool,
    held: Mutex<HashMap<i64, PoolConnection<Postgres>>>,
}

impl PgAdvisoryLock {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(|e| DealNudgeError::Database(format!("Postgres connect failed: {e}")))?;
        tracing::info!("🐘 Connected to Postgres for advisory locks");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            held: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LockBackend for PgAdvisoryLock {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn try_acquire(&self, key: &LockKey, _holder: &str, _lease: Duration) -> Result<bool> {
        let mut held = self.held.lock().await;
        // Advisory locks are re-entrant per session; refuse a second claim here.
        if held.contains_key(&key.id) {
            return Ok(false);
        }
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| lock_err(key, "Acquire", e))?;
        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(key.id)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| lock_err(key, "Acquire", e))?;
        if acquired {
            held.insert(key.id, conn);
        }
        Ok(acquired)
    }

    async fn renew(&self, key: &LockKey, _holder: &str, _lease: Duration) -> Result<bool> {
        let mut held = self.held.lock().await;
        let Some(conn) = held.get_mut(&key.id) else {
            return Ok(false);
        };
        let alive = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&mut **conn)
            .await
            .is_ok();
        if !alive {
            tracing::warn!("⚠️ Session holding {key} is gone");
            held.remove(&key.id);
        }
        Ok(alive)
    }

    async fn release(&self, key: &LockKey, _holder: &str) -> Result<()> {
        let Some(mut conn) = self.held.lock().await.remove(&key.id) else {
            return Ok(());
        };
        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(key.id)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| lock_err(key, "Release", e))?;
        if !released {
            tracing::warn!("⚠️ {key} was not held by this session at release");
        }
        Ok(())
    }

    /// Terminates whichever backend session holds the lock.
    async fn force_release(&self, key: &LockKey) -> Result<bool> {
        let (high, low) = key_halves(key.id);
        let terminated = sqlx::query_scalar::<_, Option<bool>>(
            r"
            SELECT bool_or(pg_terminate_backend(pid))
            FROM pg_locks
            WHERE locktype = 'advisory'
              AND objsubid = 1
              AND granted
              AND classid::bigint = $1
              AND objid::bigint = $2
            ",
        )
        .bind(high)
        .bind(low)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| lock_err(key, "Force release", e))?;
        Ok(terminated.unwrap_or(false))
    }
}
