//! File-backed entity store. Candidates are kept in memory, optionally mirrored
//! to a JSON file. Used for rehearsing a sweep against fixtures and as the
//! store behind the engine's tests.

use async_trait::async_trait;
use dealnudge_core::{
    CandidateEntity, CandidateFilter, DealNudgeError, EntityStore, HistoryUpdate, Result,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct FileEntityStore {
    entities: Mutex<Vec<CandidateEntity>>,
    path: Option<PathBuf>,
}

impl FileEntityStore {
    /// Store that lives only in memory.
    pub fn in_memory(entities: Vec<CandidateEntity>) -> Self {
        Self {
            entities: Mutex::new(entities),
            path: None,
        }
    }

    /// Load entities from a JSON array on disk. Updates are written back.
    pub fn open(path: &Path) -> Result<Self> {
        let entities = if path.exists() {
            let json = std::fs::read_to_string(path)?;
            serde_json::from_str(&json)?
        } else {
            Vec::new()
        };
        Ok(Self {
            entities: Mutex::new(entities),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn get(&self, id: &str) -> Option<CandidateEntity> {
        self.lock().ok()?.iter().find(|e| e.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<CandidateEntity>>> {
        self.entities
            .lock()
            .map_err(|e| DealNudgeError::Store(format!("Entity store poisoned: {e}")))
    }

    fn save(&self, entities: &[CandidateEntity]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(entities)?;
        std::fs::write(path, json)?;
        tracing::debug!("💾 Saved {} entities to {}", entities.len(), path.display());
        Ok(())
    }
}

#[async_trait]
impl EntityStore for FileEntityStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn query(&self, filter: &CandidateFilter) -> Result<Vec<CandidateEntity>> {
        let entities = self.lock()?;
        let mut matched: Vec<CandidateEntity> = entities
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.activity_at.cmp(&b.activity_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn update(&self, id: &str, update: &HistoryUpdate) -> Result<()> {
        let mut entities = self.lock()?;
        let entity = entities
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| DealNudgeError::Store(format!("No entity with id '{id}'")))?;
        entity.history.count = update.notification_count;
        entity.history.last_notified_at = Some(update.last_notified_at);
        self.save(&entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use dealnudge_core::{ActivityWindow, EntityKind, Recipient, RecipientRole};

    fn draft(id: &str, age_days: i64) -> CandidateEntity {
        CandidateEntity::new(id, EntityKind::Listing, "DRAFT", Utc::now() - Duration::days(age_days))
            .with_recipient(Recipient::new(RecipientRole::Seller, "s@example.com", None, true))
    }

    fn filter(limit: Option<usize>) -> CandidateFilter {
        CandidateFilter {
            kind: EntityKind::Listing,
            states: vec!["DRAFT".into()],
            window: ActivityWindow::IdleFor { days: 3 },
            now: Utc::now(),
            min_gap_days: 3,
            max_notifications: Some(3),
            limit,
        }
    }

    #[tokio::test]
    async fn test_query_orders_oldest_first_and_limits() {
        let store = FileEntityStore::in_memory(vec![draft("new", 4), draft("old", 30), draft("mid", 10)]);
        let found = store.query(&filter(Some(2))).await.unwrap();
        let ids: Vec<_> = found.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["old", "mid"]);
    }

    #[tokio::test]
    async fn test_query_has_no_side_effects() {
        let store = FileEntityStore::in_memory(vec![draft("a", 4), draft("b", 5)]);
        let first = store.query(&filter(None)).await.unwrap();
        let second = store.query(&filter(None)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_update_unknown_id_fails() {
        let store = FileEntityStore::in_memory(vec![]);
        let update = HistoryUpdate {
            notification_count: 1,
            last_notified_at: Utc::now(),
        };
        assert!(store.update("missing", &update).await.is_err());
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("dealnudge-store-{}.json", std::process::id()));
        std::fs::write(&path, serde_json::to_string(&vec![draft("a", 5)]).unwrap()).unwrap();

        let store = FileEntityStore::open(&path).unwrap();
        let now = Utc::now();
        store
            .update("a", &HistoryUpdate { notification_count: 1, last_notified_at: now })
            .await
            .unwrap();

        let reopened = FileEntityStore::open(&path).unwrap();
        let entity = reopened.get("a").unwrap();
        assert_eq!(entity.history.count, 1);
        assert_eq!(entity.history.last_notified_at, Some(now));
        std::fs::remove_file(&path).ok();
    }
}
