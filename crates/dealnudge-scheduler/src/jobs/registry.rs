//! The set of jobs this deployment knows about.

use dealnudge_core::{DealNudgeConfig, DealNudgeError, Result};
use std::collections::{HashMap, HashSet};

use super::{
    DealroomInactivity, DraftReminder, JobPolicy, MetricsExpiration, ProfileReminder, WeeklyDigest,
};

pub struct JobRegistry {
    jobs: Vec<Box<dyn JobPolicy>>,
}

impl JobRegistry {
    pub const BUILTIN: &'static [&'static str] = &[
        ProfileReminder::NAME,
        DraftReminder::NAME,
        DealroomInactivity::NAME,
        WeeklyDigest::NAME,
        MetricsExpiration::NAME,
    ];

    /// Registry from explicit policies. Rejects duplicate names and lock keys.
    pub fn new(jobs: Vec<Box<dyn JobPolicy>>) -> Result<Self> {
        let mut names: HashSet<&str> = HashSet::new();
        let mut keys: HashMap<i64, &str> = HashMap::new();
        for job in &jobs {
            if !names.insert(job.name()) {
                return Err(DealNudgeError::Config(format!(
                    "Job '{}' registered twice",
                    job.name()
                )));
            }
            let key = job.settings().lock_key;
            if let Some(first) = keys.insert(key, job.name()) {
                return Err(DealNudgeError::DuplicateLockKey {
                    key,
                    first: first.to_string(),
                    second: job.name().to_string(),
                });
            }
        }
        Ok(Self { jobs })
    }

    /// The five built-in jobs with defaults.
    pub fn builtin() -> Result<Self> {
        Self::from_config(&DealNudgeConfig::default())
    }

    /// The built-in jobs with `[jobs.<name>]` overrides applied.
    pub fn from_config(config: &DealNudgeConfig) -> Result<Self> {
        config.validate(Self::BUILTIN)?;
        let settings_for = |name: &str, mut settings: super::JobSettings| {
            if let Some(overrides) = config.jobs.get(name) {
                settings.apply(overrides);
            }
            settings
        };

        Self::new(vec![
            Box::new(ProfileReminder::new(settings_for(
                ProfileReminder::NAME,
                ProfileReminder::default_settings(),
            ))),
            Box::new(DraftReminder::new(settings_for(
                DraftReminder::NAME,
                DraftReminder::default_settings(),
            ))),
            Box::new(DealroomInactivity::new(settings_for(
                DealroomInactivity::NAME,
                DealroomInactivity::default_settings(),
            ))),
            Box::new(WeeklyDigest::new(settings_for(
                WeeklyDigest::NAME,
                WeeklyDigest::default_settings(),
            ))),
            Box::new(MetricsExpiration::new(settings_for(
                MetricsExpiration::NAME,
                MetricsExpiration::default_settings(),
            ))),
        ])
    }

    pub fn get(&self, name: &str) -> Result<&dyn JobPolicy> {
        self.jobs
            .iter()
            .find(|j| j.name() == name)
            .map(|j| j.as_ref())
            .ok_or_else(|| DealNudgeError::UnknownJob(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn JobPolicy> {
        self.jobs.iter().map(|j| j.as_ref())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_jobs_have_unique_keys() {
        let registry = JobRegistry::builtin().unwrap();
        assert_eq!(registry.len(), 5);
        let mut keys: Vec<i64> = registry.iter().map(|j| j.settings().lock_key).collect();
        keys.sort();
        assert_eq!(keys, vec![1001, 1002, 1003, 1004, 1005]);
    }

    #[test]
    fn test_unknown_job() {
        let registry = JobRegistry::builtin().unwrap();
        assert!(matches!(
            registry.get("monthly-spam"),
            Err(DealNudgeError::UnknownJob(_))
        ));
        assert_eq!(registry.get("weekly-digest").unwrap().name(), "weekly-digest");
    }

    #[test]
    fn test_overrides_applied() {
        let config = DealNudgeConfig::from_toml(
            "[jobs.draft-reminder]\nrate_limit_per_minute = 10\nmin_days_between = 5",
        )
        .unwrap();
        let registry = JobRegistry::from_config(&config).unwrap();
        let draft = registry.get("draft-reminder").unwrap();
        assert_eq!(draft.settings().rate_limit_per_minute, 10);
        assert_eq!(draft.settings().min_days_between, 5);
        assert_eq!(draft.settings().max_notifications, Some(3));
    }

    #[test]
    fn test_colliding_lock_keys_rejected() {
        let config = DealNudgeConfig::from_toml("[jobs.weekly-digest]\nlock_key = 1002").unwrap();
        let err = JobRegistry::from_config(&config).err().unwrap();
        assert!(matches!(
            err,
            DealNudgeError::DuplicateLockKey { key: 1002, .. }
        ));
    }
}
