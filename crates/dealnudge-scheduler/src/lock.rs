//! Job mutual exclusion: a fail-safe wrapper over any [`LockBackend`], lease
//! renewal during long sweeps, and an in-process backend for single-instance
//! deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealnudge_core::types::lease_expiry;
use dealnudge_core::{Clock, LockBackend, LockKey, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Claim `key`, treating any backend failure as contention.
pub async fn try_lock(backend: &dyn LockBackend, key: &LockKey, holder: &str, lease: Duration) -> bool {
    match backend.try_acquire(key, holder, lease).await {
        Ok(acquired) => acquired,
        Err(e) => {
            tracing::error!("🔒 Lock backend '{}' failed for {key}: {e}", backend.name());
            false
        }
    }
}

/// Release `key`. Never fails; errors are logged.
pub async fn unlock(backend: &dyn LockBackend, key: &LockKey, holder: &str) {
    if let Err(e) = backend.release(key, holder).await {
        tracing::error!("🔓 Failed to release {key} on '{}': {e}", backend.name());
    }
}

/// Keeps a held lease alive while a sweep runs.
///
/// Renews once half the lease has elapsed since the last grant.
pub struct LeaseKeeper {
    backend: Arc<dyn LockBackend>,
    clock: Arc<dyn Clock>,
    key: LockKey,
    holder: String,
    lease: Duration,
    granted_at: DateTime<Utc>,
}

impl LeaseKeeper {
    pub fn new(
        backend: Arc<dyn LockBackend>,
        clock: Arc<dyn Clock>,
        key: LockKey,
        holder: &str,
        lease: Duration,
    ) -> Self {
        let granted_at = clock.now();
        Self {
            backend,
            clock,
            key,
            holder: holder.to_string(),
            lease,
            granted_at,
        }
    }

    /// `false` once the lock is known to be lost.
    pub async fn keep_alive(&mut self) -> bool {
        let now = self.clock.now();
        let half = chrono::Duration::from_std(self.lease / 2).unwrap_or(chrono::Duration::MAX);
        if now - self.granted_at < half {
            return true;
        }
        match self.backend.renew(&self.key, &self.holder, self.lease).await {
            Ok(true) => {
                tracing::debug!("🔁 Renewed lease on {}", self.key);
                self.granted_at = now;
                true
            }
            Ok(false) => {
                tracing::warn!("⚠️ Lease on {} was taken over by another holder", self.key);
                false
            }
            Err(e) => {
                tracing::error!("🔒 Failed to renew lease on {}: {e}", self.key);
                false
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    expires_at: DateTime<Utc>,
}

/// In-process lease lock. Does not protect against other processes.
pub struct MemoryLockBackend {
    clock: Arc<dyn Clock>,
    leases: Mutex<HashMap<LockKey, Lease>>,
}

impl MemoryLockBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            leases: Mutex::new(HashMap::new()),
        }
    }

    pub fn holder_of(&self, key: &LockKey) -> Option<String> {
        let now = self.clock.now();
        let leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases
            .get(key)
            .filter(|l| l.expires_at > now)
            .map(|l| l.holder.clone())
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn try_acquire(&self, key: &LockKey, holder: &str, lease: Duration) -> Result<bool> {
        let now = self.clock.now();
        let expires_at = lease_expiry(now, lease)?;
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        if leases.get(key).is_some_and(|l| l.expires_at > now) {
            return Ok(false);
        }
        leases.insert(
            key.clone(),
            Lease {
                holder: holder.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn renew(&self, key: &LockKey, holder: &str, lease: Duration) -> Result<bool> {
        let now = self.clock.now();
        let expires_at = lease_expiry(now, lease)?;
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        match leases.get_mut(key) {
            Some(l) if l.holder == holder && l.expires_at > now => {
                l.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &LockKey, holder: &str) -> Result<()> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        if leases.get(key).is_some_and(|l| l.holder == holder) {
            leases.remove(key);
        }
        Ok(())
    }

    async fn force_release(&self, key: &LockKey) -> Result<bool> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        Ok(leases.remove(key).is_some())
    }
}
