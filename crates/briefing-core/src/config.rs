use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{BriefingError, Result};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300; // due-set precision, not subscriber cadence
pub const DEFAULT_MAX_CONCURRENT_DISPATCHES: usize = 4;
pub const DEFAULT_GENERATE_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_STALE_DISPATCH_SECS: u64 = 900; // pending records older than this are crash leftovers
pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_FROM_ADDRESS: &str = "reports@briefing.local";
pub const ENV_PREFIX: &str = "BRIEFING_";

/// Top-level config (briefing.toml + BRIEFING_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BriefingConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Outbound mail. When absent the daemon can only dry-run.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    /// Report-generation service. When absent the daemon can only dry-run.
    #[serde(default)]
    pub pipeline: Option<PipelineConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Driver loop and dispatcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between two due-set scans.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Upper bound on dispatches running at once within a cycle.
    /// `1` processes due subscriptions strictly oldest-due first.
    #[serde(default = "default_max_concurrent_dispatches")]
    pub max_concurrent_dispatches: usize,
    #[serde(default = "default_generate_timeout_secs")]
    pub generate_timeout_secs: u64,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Maximum plausible duration of one dispatch. Used as the claim lease and
    /// as the age after which a `pending` delivery record is declared crashed.
    #[serde(default = "default_stale_dispatch_secs")]
    pub stale_dispatch_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_concurrent_dispatches: DEFAULT_MAX_CONCURRENT_DISPATCHES,
            generate_timeout_secs: DEFAULT_GENERATE_TIMEOUT_SECS,
            send_timeout_secs: DEFAULT_SEND_TIMEOUT_SECS,
            stale_dispatch_secs: DEFAULT_STALE_DISPATCH_SECS,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn stale_dispatch(&self) -> Duration {
        Duration::from_secs(self.stale_dispatch_secs)
    }
}

/// SMTP relay used by the mail transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    /// Display name on the From header, e.g. "Market Intelligence".
    pub from_name: Option<String>,
    /// Prepended to every subject line, e.g. "[Briefing]".
    #[serde(default)]
    pub subject_prefix: Option<String>,
}

/// HTTP report-generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Base URL without trailing slash.
    pub base_url: String,
    /// Bearer token sent on every request, if the service requires one.
    pub api_token: Option<String>,
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.briefing/briefing.db", home)
}
fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_max_concurrent_dispatches() -> usize {
    DEFAULT_MAX_CONCURRENT_DISPATCHES
}
fn default_generate_timeout_secs() -> u64 {
    DEFAULT_GENERATE_TIMEOUT_SECS
}
fn default_send_timeout_secs() -> u64 {
    DEFAULT_SEND_TIMEOUT_SECS
}
fn default_stale_dispatch_secs() -> u64 {
    DEFAULT_STALE_DISPATCH_SECS
}
fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}
fn default_from_address() -> String {
    DEFAULT_FROM_ADDRESS.to_string()
}

impl BriefingConfig {
    /// Load config from a TOML file with BRIEFING_* env var overrides.
    ///
    /// Nested keys use a double underscore:
    /// `BRIEFING_SCHEDULER__POLL_INTERVAL_SECS=60`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Extract and validate from an already assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: BriefingConfig = figment
            .extract()
            .map_err(|e| BriefingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the driver loop misbehave.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.poll_interval_secs == 0 {
            return Err(invalid("scheduler.poll_interval_secs", "must be > 0"));
        }
        if s.max_concurrent_dispatches == 0 {
            return Err(invalid("scheduler.max_concurrent_dispatches", "must be > 0"));
        }
        if s.generate_timeout_secs == 0 || s.send_timeout_secs == 0 {
            return Err(invalid("scheduler.*_timeout_secs", "must be > 0"));
        }
        // A live dispatch must never look stale to reconciliation.
        let dispatch_budget = s.generate_timeout_secs.saturating_add(s.send_timeout_secs);
        if s.stale_dispatch_secs <= dispatch_budget {
            return Err(invalid(
                "scheduler.stale_dispatch_secs",
                "must exceed generate_timeout_secs + send_timeout_secs",
            ));
        }
        if let Some(smtp) = &self.smtp {
            if smtp.host.trim().is_empty() {
                return Err(invalid("smtp.host", "must not be empty"));
            }
        }
        if let Some(pipeline) = &self.pipeline {
            if !pipeline.base_url.starts_with("http://") && !pipeline.base_url.starts_with("https://")
            {
                return Err(invalid("pipeline.base_url", "must be an http(s) URL"));
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> BriefingError {
    BriefingError::InvalidConfig {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.briefing/briefing.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<BriefingConfig> {
        BriefingConfig::from_figment(Figment::new().merge(Toml::string(toml)))
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.scheduler.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(
            config.scheduler.max_concurrent_dispatches,
            DEFAULT_MAX_CONCURRENT_DISPATCHES
        );
        assert!(config.smtp.is_none());
        assert!(config.pipeline.is_none());
        assert!(config.database.path.ends_with("briefing.db"));
    }

    #[test]
    fn smtp_section_fills_defaults() {
        let config = parse(
            r#"
            [smtp]
            host = "smtp.example.com"
            username = "mailer"
            password = "hunter2"
            "#,
        )
        .unwrap();
        let smtp = config.smtp.unwrap();
        assert_eq!(smtp.port, DEFAULT_SMTP_PORT);
        assert_eq!(smtp.from_address, DEFAULT_FROM_ADDRESS);
        assert_eq!(smtp.username.as_deref(), Some("mailer"));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = parse("[scheduler]\npoll_interval_secs = 0").unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
        assert!(err.to_string().contains("poll_interval_secs"));
    }

    #[test]
    fn stale_threshold_must_cover_timeouts() {
        let err = parse(
            r#"
            [scheduler]
            generate_timeout_secs = 300
            send_timeout_secs = 300
            stale_dispatch_secs = 600
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("stale_dispatch_secs"));
    }

    #[test]
    fn huge_timeouts_do_not_overflow_validation() {
        let config = BriefingConfig {
            scheduler: SchedulerConfig {
                generate_timeout_secs: u64::MAX,
                send_timeout_secs: 60,
                stale_dispatch_secs: u64::MAX,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scheduler.stale_dispatch_secs"));
    }

    #[test]
    fn pipeline_url_must_be_http() {
        let err = parse("[pipeline]\nbase_url = \"ftp://reports\"").unwrap_err();
        assert!(err.to_string().contains("pipeline.base_url"));
    }

    #[test]
    fn durations_are_exposed_as_std_durations() {
        let config = parse("[scheduler]\npoll_interval_secs = 30").unwrap();
        assert_eq!(config.scheduler.poll_interval(), Duration::from_secs(30));
        assert_eq!(
            config.scheduler.stale_dispatch(),
            Duration::from_secs(DEFAULT_STALE_DISPATCH_SECS)
        );
    }
}
