//! Fakes shared by the engine tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealnudge_core::{
    CandidateEntity, CandidateFilter, Clock, DealNudgeError, EntityStore, HistoryUpdate,
    NotificationSender, Result,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::clock::ManualClock;
use crate::store::FileEntityStore;

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub to: String,
    pub template: String,
    pub at: DateTime<Utc>,
}

/// Records every send. Addresses in `fail_for` error, in `panic_for` panic.
pub struct RecordingSender {
    clock: Arc<ManualClock>,
    sent: Mutex<Vec<SentMessage>>,
    fail_for: HashSet<String>,
    panic_for: HashSet<String>,
    yield_on_send: bool,
}

impl RecordingSender {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            sent: Mutex::new(Vec::new()),
            fail_for: HashSet::new(),
            panic_for: HashSet::new(),
            yield_on_send: false,
        }
    }

    pub fn failing(mut self, email: &str) -> Self {
        self.fail_for.insert(email.to_string());
        self
    }

    pub fn panicking(mut self, email: &str) -> Self {
        self.panic_for.insert(email.to_string());
        self
    }

    /// Give other tasks a turn inside every send.
    pub fn yielding(mut self) -> Self {
        self.yield_on_send = true;
        self
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.to).collect()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, to: &str, template: &str, _params: &serde_json::Value) -> Result<()> {
        if self.yield_on_send {
            tokio::task::yield_now().await;
        }
        if self.panic_for.contains(to) {
            panic!("template renderer blew up for {to}");
        }
        if self.fail_for.contains(to) {
            return Err(DealNudgeError::Channel(format!("550 mailbox unavailable: {to}")));
        }
        self.sent.lock().unwrap().push(SentMessage {
            to: to.to_string(),
            template: template.to_string(),
            at: self.clock.now(),
        });
        Ok(())
    }
}

/// Wraps a [`FileEntityStore`]; can be told to fail queries or updates.
pub struct FlakyStore {
    pub inner: FileEntityStore,
    pub fail_query: bool,
    pub fail_update_for: HashSet<String>,
}

impl FlakyStore {
    pub fn new(entities: Vec<CandidateEntity>) -> Self {
        Self {
            inner: FileEntityStore::in_memory(entities),
            fail_query: false,
            fail_update_for: HashSet::new(),
        }
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn query(&self, filter: &CandidateFilter) -> Result<Vec<CandidateEntity>> {
        if self.fail_query {
            return Err(DealNudgeError::Database("connection reset by peer".into()));
        }
        self.inner.query(filter).await
    }

    async fn update(&self, id: &str, update: &HistoryUpdate) -> Result<()> {
        if self.fail_update_for.contains(id) {
            return Err(DealNudgeError::Database(format!("deadlock updating {id}")));
        }
        self.inner.update(id, update).await
    }
}
