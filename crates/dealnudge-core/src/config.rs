//! DealNudge configuration system.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{DealNudgeError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealNudgeConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub lock_backend: LockBackendKind,
    #[serde(default)]
    pub postgres_url: String,
    /// Lock lease; a crashed holder's lock expires after this long.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    #[serde(default)]
    pub holder_prefix: Option<String>,
    #[serde(default)]
    pub sender: SenderConfig,
    /// Per-job overrides keyed by job name.
    #[serde(default)]
    pub jobs: BTreeMap<String, JobOverrides>,
}

fn default_database_path() -> String { "~/.dealnudge/dealnudge.db".into() }
fn default_lease_secs() -> u64 { 600 }

/// Longest lease a run may hold: one day.
pub const MAX_LEASE_SECS: u64 = 86_400;

impl Default for DealNudgeConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            lock_backend: LockBackendKind::default(),
            postgres_url: String::new(),
            lease_secs: default_lease_secs(),
            holder_prefix: None,
            sender: SenderConfig::default(),
            jobs: BTreeMap::new(),
        }
    }
}

impl DealNudgeConfig {
    /// Load config from the default path (~/.dealnudge/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DealNudgeError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| DealNudgeError::Config(format!("Failed to parse config: {e}")))
    }

    /// Fill secrets and paths from the environment when set.
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("DEALNUDGE_DATABASE_PATH") {
            self.database_path = path;
        }
        if let Ok(url) = std::env::var("DEALNUDGE_POSTGRES_URL") {
            self.postgres_url = url;
        }
        if let Ok(password) = std::env::var("DEALNUDGE_SMTP_PASSWORD") {
            self.sender.email.password = password;
        }
    }

    /// Reject overrides for jobs that do not exist and nonsensical values.
    pub fn validate(&self, known_jobs: &[&str]) -> Result<()> {
        if self.lease_secs == 0 || self.lease_secs > MAX_LEASE_SECS {
            return Err(DealNudgeError::Config(format!(
                "lease_secs must be between 1 and {MAX_LEASE_SECS}"
            )));
        }
        for (name, overrides) in &self.jobs {
            if !known_jobs.contains(&name.as_str()) {
                return Err(DealNudgeError::Config(format!(
                    "Unknown job in [jobs.{name}] (known: {})",
                    known_jobs.join(", ")
                )));
            }
            if overrides.rate_limit_per_minute == Some(0) {
                return Err(DealNudgeError::Config(format!(
                    "[jobs.{name}] rate_limit_per_minute must be > 0"
                )));
            }
        }
        if self.lock_backend == LockBackendKind::Postgres && self.postgres_url.is_empty() {
            return Err(DealNudgeError::Config(
                "lock_backend = \"postgres\" requires postgres_url".into(),
            ));
        }
        Ok(())
    }

    /// Database path with `~` expanded.
    pub fn expanded_database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database_path).to_string())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the DealNudge home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dealnudge")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockBackendKind {
    #[default]
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    Email,
    Webhook,
    #[default]
    Log,
}

/// How many candidates one run may pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// At most one minute of sends per run.
    Capped,
    /// Everything eligible, paced by the rate limiter.
    Paced,
}

/// How the rate limiter spreads sends over a minute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingMode {
    /// Fixed gap of `60s / rate` between sends.
    #[default]
    Spaced,
    /// Up to `rate` sends in any rolling 60 s window.
    Windowed,
}

/// Outbound channel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderConfig {
    #[serde(default)]
    pub kind: SenderKind,
    #[serde(default)]
    pub email: EmailSenderConfig,
    #[serde(default)]
    pub webhook: WebhookSenderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSenderConfig {
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default = "default_email_timeout")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 { 587 }
fn default_email_timeout() -> u64 { 30 }

impl Default for EmailSenderConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            from_name: None,
            timeout_secs: default_email_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSenderConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

fn default_webhook_timeout() -> u64 { 10 }

impl Default for WebhookSenderConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            headers: BTreeMap::new(),
            timeout_secs: default_webhook_timeout(),
        }
    }
}

/// Per-job overrides. Absent fields keep the job's built-in default.
/// `max_notifications = 0` removes the per-entity cap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOverrides {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub lock_key: Option<i64>,
    #[serde(default)]
    pub threshold_days: Option<u32>,
    #[serde(default)]
    pub min_days_between: Option<u32>,
    #[serde(default)]
    pub max_notifications: Option<u32>,
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
    #[serde(default)]
    pub batch_mode: Option<BatchMode>,
    #[serde(default)]
    pub pacing: Option<PacingMode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOBS: &[&str] = &["draft-reminder", "weekly-digest"];

    #[test]
    fn test_default_config() {
        let config = DealNudgeConfig::default();
        assert_eq!(config.lease_secs, 600);
        assert_eq!(config.lock_backend, LockBackendKind::Sqlite);
        assert_eq!(config.sender.kind, SenderKind::Log);
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            database_path = "/var/lib/dealnudge/db.sqlite"
            lease_secs = 120

            [sender]
            kind = "email"

            [sender.email]
            smtp_host = "smtp.example.com"
            from_address = "noreply@example.com"

            [jobs.draft-reminder]
            rate_limit_per_minute = 30
            batch_mode = "paced"
            pacing = "windowed"
        "#;

        let config = DealNudgeConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.lease_secs, 120);
        assert_eq!(config.sender.kind, SenderKind::Email);
        assert_eq!(config.sender.email.smtp_port, 587);
        let job = &config.jobs["draft-reminder"];
        assert_eq!(job.rate_limit_per_minute, Some(30));
        assert_eq!(job.batch_mode, Some(BatchMode::Paced));
        assert_eq!(job.pacing, Some(PacingMode::Windowed));
        assert_eq!(job.lock_key, None);
        config.validate(JOBS).unwrap();
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config = DealNudgeConfig::from_toml("").unwrap();
        assert_eq!(config.database_path, "~/.dealnudge/dealnudge.db");
        assert_eq!(config.sender.webhook.timeout_secs, 10);
    }

    #[test]
    fn test_validate_rejects_unknown_job() {
        let config = DealNudgeConfig::from_toml("[jobs.nightly-spam]\nenabled = true").unwrap();
        let err = config.validate(JOBS).unwrap_err();
        assert!(err.to_string().contains("nightly-spam"));
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let config =
            DealNudgeConfig::from_toml("[jobs.weekly-digest]\nrate_limit_per_minute = 0").unwrap();
        assert!(config.validate(JOBS).is_err());
    }

    #[test]
    fn test_validate_bounds_lease() {
        let config = DealNudgeConfig::from_toml("lease_secs = 9223372036854775807").unwrap();
        assert!(config.validate(JOBS).is_err());
        let config = DealNudgeConfig::from_toml(&format!("lease_secs = {MAX_LEASE_SECS}")).unwrap();
        assert!(config.validate(JOBS).is_ok());
    }

    #[test]
    fn test_validate_postgres_requires_url() {
        let config = DealNudgeConfig::from_toml("lock_backend = \"postgres\"").unwrap();
        assert!(config.validate(JOBS).is_err());
    }

    #[test]
    fn test_home_dir() {
        let home = DealNudgeConfig::home_dir();
        assert!(home.to_string_lossy().contains("dealnudge"));
    }
}
