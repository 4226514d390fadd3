//! Warns sellers before their verified metrics lapse.
//!
//! All expiring metrics of one seller go out in a single message; a
//! confirmed send stamps every metric in the group.

use chrono::{DateTime, Utc};
use dealnudge_core::{
    ActivityWindow, BatchMode, CandidateEntity, EntityKind, PacingMode, Recipient,
};
use serde_json::json;
use std::collections::BTreeMap;

use super::{JobPolicy, JobSettings};
use crate::dispatch::Dispatch;

const TEMPLATE: &str = "metric-expiration-warning";

pub struct MetricsExpiration {
    settings: JobSettings,
}

impl MetricsExpiration {
    pub const NAME: &'static str = "metrics-expiration";

    pub fn new(settings: JobSettings) -> Self {
        Self { settings }
    }

    pub fn default_settings() -> JobSettings {
        JobSettings {
            enabled: true,
            lock_key: 1005,
            threshold_days: 7,
            min_days_between: 3,
            max_notifications: Some(3),
            rate_limit_per_minute: 50,
            batch_mode: BatchMode::Paced,
            pacing: PacingMode::Windowed,
        }
    }

    fn metric_summary(entity: &CandidateEntity) -> serde_json::Value {
        json!({
            "metric_id": entity.id,
            "listing_id": entity.attr_str("listing_id"),
            "listing_title": entity.attr_str("listing_title"),
            "metric_type": entity.attr_str("metric_type"),
            "expires_at": entity.expires_at.map(|t| t.to_rfc3339()),
        })
    }
}

impl Default for MetricsExpiration {
    fn default() -> Self {
        Self::new(Self::default_settings())
    }
}

impl JobPolicy for MetricsExpiration {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Warn sellers that verified metrics expire soon"
    }

    fn settings(&self) -> &JobSettings {
        &self.settings
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::VerifiedMetric
    }

    fn states(&self) -> &'static [&'static str] {
        &["VERIFIED"]
    }

    fn window(&self) -> ActivityWindow {
        ActivityWindow::ExpiresWithin {
            days: self.settings.threshold_days,
        }
    }

    fn message(
        &self,
        entity: &CandidateEntity,
        recipient: &Recipient,
        _now: DateTime<Utc>,
    ) -> (String, serde_json::Value) {
        (
            TEMPLATE.into(),
            json!({
                "first_name": recipient.first_name,
                "metrics": [Self::metric_summary(entity)],
            }),
        )
    }

    fn plan(&self, candidates: &[CandidateEntity], _now: DateTime<Utc>) -> Vec<Dispatch> {
        // Group by seller address, keeping first-seen order.
        let mut order: Vec<String> = Vec::new();
        let mut groups: BTreeMap<String, (Recipient, Vec<&CandidateEntity>)> = BTreeMap::new();
        for metric in candidates {
            for recipient in &metric.recipients {
                let key = recipient.email.to_lowercase();
                let entry = groups.entry(key.clone()).or_insert_with(|| {
                    order.push(key);
                    (recipient.clone(), Vec::new())
                });
                entry.1.push(metric);
            }
        }

        order
            .into_iter()
            .filter_map(|key| groups.remove(&key))
            .map(|(recipient, metrics)| Dispatch {
                entity_ids: metrics.iter().map(|m| m.id.clone()).collect(),
                template: TEMPLATE.into(),
                params: json!({
                    "first_name": recipient.first_name,
                    "metrics": metrics.iter().map(|m| Self::metric_summary(m)).collect::<Vec<_>>(),
                }),
                recipient,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use dealnudge_core::RecipientRole;

    fn metric(id: &str, seller: &str, now: DateTime<Utc>) -> CandidateEntity {
        CandidateEntity::new(id, EntityKind::VerifiedMetric, "VERIFIED", now - Duration::days(80))
            .with_expiry(now + Duration::days(3))
            .with_attribute("listing_title", json!(format!("Listing {id}")))
            .with_attribute("metric_type", json!("REVENUE"))
            .with_recipient(Recipient::new(RecipientRole::Seller, seller, Some("Sam"), true))
    }

    #[test]
    fn test_groups_metrics_per_seller() {
        let now = Utc::now();
        let job = MetricsExpiration::default();
        let candidates = vec![
            metric("m1", "a@x.io", now),
            metric("m2", "b@x.io", now),
            metric("m3", "A@x.io", now),
        ];
        let dispatches = job.plan(&candidates, now);

        assert_eq!(dispatches.len(), 2);
        assert_eq!(dispatches[0].recipient.email, "a@x.io");
        assert_eq!(dispatches[0].entity_ids, vec!["m1", "m3"]);
        assert_eq!(dispatches[0].params["metrics"].as_array().unwrap().len(), 2);
        assert_eq!(dispatches[1].entity_ids, vec!["m2"]);
    }

    #[test]
    fn test_windowed_pacing_at_fifty() {
        let job = MetricsExpiration::default();
        assert_eq!(job.settings().rate_limit_per_minute, 50);
        assert_eq!(job.settings().pacing, PacingMode::Windowed);
        assert_eq!(job.window(), ActivityWindow::ExpiresWithin { days: 7 });
    }
}
