//! Eligibility query: which entities a job should notify this run.

use chrono::{DateTime, Utc};
use dealnudge_core::{CandidateEntity, CandidateFilter, EntityStore, Result};

use crate::jobs::JobPolicy;

/// The store-level filter for `job` at `now`.
pub fn candidate_filter(job: &dyn JobPolicy, now: DateTime<Utc>) -> CandidateFilter {
    let settings = job.settings();
    CandidateFilter {
        kind: job.entity_kind(),
        states: job.states().iter().map(|s| s.to_string()).collect(),
        window: job.window(),
        now,
        min_gap_days: settings.min_days_between,
        max_notifications: settings.max_notifications,
        limit: settings.batch_limit(job.parties_per_entity()),
    }
}

/// Query the store and re-check every safeguard locally, so a lax store
/// cannot cause a duplicate or over-cap notification.
///
/// Returns candidates oldest-activity first. Has no side effects.
pub async fn find_candidates(
    store: &dyn EntityStore,
    job: &dyn JobPolicy,
    now: DateTime<Utc>,
) -> Result<Vec<CandidateEntity>> {
    let filter = candidate_filter(job, now);
    let mut found = store.query(&filter).await?;
    let mut returned = found.len();
    found.retain(|e| filter.matches(e) && job.accepts(e));

    if let Some(limit) = filter.limit {
        // Rejected rows took up the store's cap; look past them.
        if returned >= limit && found.len() < limit {
            let uncapped = CandidateFilter {
                limit: None,
                ..filter.clone()
            };
            found = store.query(&uncapped).await?;
            returned = found.len();
            found.retain(|e| filter.matches(e) && job.accepts(e));
        }
    }

    found.sort_by(|a, b| a.activity_at.cmp(&b.activity_at).then_with(|| a.id.cmp(&b.id)));
    if let Some(limit) = filter.limit {
        found.truncate(limit);
    }

    if found.len() != returned {
        tracing::debug!(
            "[{}] {} of {} stored candidates kept after local checks",
            job.name(),
            found.len(),
            returned
        );
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{DealroomInactivity, DraftReminder, JobSettings};
    use crate::store::FileEntityStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use dealnudge_core::{EntityKind, HistoryUpdate, Recipient, RecipientRole};

    fn draft(id: &str, now: DateTime<Utc>, age_days: i64) -> CandidateEntity {
        CandidateEntity::new(id, EntityKind::Listing, "DRAFT", now - Duration::days(age_days))
            .with_recipient(Recipient::new(RecipientRole::Seller, "s@x.io", None, true))
    }

    #[test]
    fn test_filter_from_policy() {
        let now = Utc::now();
        let filter = candidate_filter(&DealroomInactivity::default(), now);
        assert_eq!(filter.kind, EntityKind::Dealroom);
        assert_eq!(filter.limit, Some(50));
        assert_eq!(filter.min_gap_days, 7);
        assert_eq!(filter.max_notifications, Some(3));
    }

    #[tokio::test]
    async fn test_skips_recent_and_capped() {
        let now = Utc::now();
        let mut settings = DraftReminder::default_settings();
        settings.threshold_days = 7;
        let job = DraftReminder::new(settings);

        let store = FileEntityStore::in_memory(vec![
            // A: 10 days old, never notified
            draft("a", now, 10),
            // B: notified 2 days ago
            draft("b", now, 10).with_history(1, Some(now - Duration::days(2))),
            // C: already at the cap
            draft("c", now, 300).with_history(3, Some(now - Duration::days(100))),
        ]);

        let found = find_candidates(&store, &job, now).await.unwrap();
        let ids: Vec<_> = found.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn test_query_is_idempotent() {
        let now = Utc::now();
        let store = FileEntityStore::in_memory(vec![draft("a", now, 5), draft("b", now, 9)]);
        let job = DraftReminder::default();
        let first = find_candidates(&store, &job, now).await.unwrap();
        let second = find_candidates(&store, &job, now).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].id, "b");
    }

    /// Ignores the filter entirely.
    struct LaxStore(Vec<CandidateEntity>);

    #[async_trait]
    impl EntityStore for LaxStore {
        fn name(&self) -> &str {
            "lax"
        }
        async fn query(&self, _: &CandidateFilter) -> Result<Vec<CandidateEntity>> {
            Ok(self.0.clone())
        }
        async fn update(&self, _: &str, _: &HistoryUpdate) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_local_checks_guard_lax_store() {
        let now = Utc::now();
        let mut settings: JobSettings = DraftReminder::default_settings();
        settings.rate_limit_per_minute = 2;
        let job = DraftReminder::new(settings);
        let store = LaxStore(vec![
            draft("capped", now, 30).with_history(3, None),
            draft("fresh", now, 1),
            draft("x", now, 5),
            draft("y", now, 6),
            draft("z", now, 7),
        ]);

        let found = find_candidates(&store, &job, now).await.unwrap();
        let ids: Vec<_> = found.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "y"]);
    }
}
