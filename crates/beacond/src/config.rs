//! Engine configuration.
//!
//! Loaded from a TOML file. Every section is optional and falls back to the
//! defaults below:
//! - `[scheduler]` job intervals and the stop grace period
//! - `[cache]` TTL and sweep interval of the dashboard cache
//! - `[health]` health window and default thresholds
//! - `[notifications]` retry policy, SMTP relay and webhook timeout
//! - `[retention]` how long raw logs and rollups are kept
//! - `[[alerts]]` alert configs loaded into the config store at startup

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use beacon_alerts::{AlertConfig, RetryPolicy, SmtpSettings, parse_address};
use beacon_dashboard::{CacheConfig, DashboardConfig};
use beacon_logs::RetentionPolicy;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Sample configuration written by `beacond init-config`.
pub const SAMPLE_CONFIG: &str = r#"# beacond configuration

log_filter = "info"
json_logs = false

[scheduler]
aggregation_interval_secs = 60
daily_interval_secs = 3600
health_check_interval_secs = 300
stop_grace_secs = 30

[cache]
ttl_secs = 300
sweep_interval_secs = 60

[health]
window_secs = 3600
error_threshold_per_hour = 50
warning_threshold_per_hour = 50
top_errors_limit = 10

[notifications]
webhook_timeout_secs = 10
# from = "beacon@example.com"

[notifications.retry]
max_attempts = 3
initial_delay_ms = 100
backoff_multiplier = 1.5
max_delay_ms = 30000

# [notifications.smtp]
# host = "smtp.example.com"
# port = 587
# security = "starttls"

[retention]
raw_logs_hours = 24
minute_rows_hours = 24
hourly_rows_days = 30
daily_rows_days = 365

[[alerts]]
service = "api"
error_threshold_per_min = 10
warning_threshold_per_min = 50
alert_webhook_url = "https://hooks.example.com/beacon"
"#;

/// Job intervals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerSection {
    /// Minute/hourly aggregation, threshold check and notification.
    pub aggregation_interval_secs: u64,
    /// Daily rollup.
    pub daily_interval_secs: u64,
    /// Health report refresh.
    pub health_check_interval_secs: u64,
    /// How long a stop waits for in-flight jobs before cancelling them.
    pub stop_grace_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            aggregation_interval_secs: 60,
            daily_interval_secs: 60 * 60,
            health_check_interval_secs: 5 * 60,
            stop_grace_secs: 30,
        }
    }
}

impl SchedulerSection {
    /// Aggregation interval.
    #[must_use]
    pub const fn aggregation_interval(&self) -> Duration {
        Duration::from_secs(self.aggregation_interval_secs)
    }

    /// Daily rollup interval.
    #[must_use]
    pub const fn daily_interval(&self) -> Duration {
        Duration::from_secs(self.daily_interval_secs)
    }

    /// Health check interval.
    #[must_use]
    pub const fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    /// Stop grace period.
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// Dashboard cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheSection {
    /// Default entry lifetime.
    pub ttl_secs: u64,
    /// Expired entry sweep interval.
    pub sweep_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: 5 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl CacheSection {
    /// The cache configuration.
    #[must_use]
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(Duration::from_secs(self.ttl_secs))
            .with_sweep_interval(Duration::from_secs(self.sweep_interval_secs))
    }
}

/// Service health settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthSection {
    /// Window over which health and dashboard statistics are computed.
    pub window_secs: u64,
    /// Errors per hour above which a service without an alert config is `Error`.
    pub error_threshold_per_hour: u64,
    /// Warnings per hour above which a service without an alert config is `Warning`.
    pub warning_threshold_per_hour: u64,
    /// Entries kept in the top errors list.
    pub top_errors_limit: usize,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            window_secs: 60 * 60,
            error_threshold_per_hour: 50,
            warning_threshold_per_hour: 50,
            top_errors_limit: 10,
        }
    }
}

impl HealthSection {
    /// The health and statistics window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// The dashboard configuration.
    #[must_use]
    pub fn dashboard_config(&self) -> DashboardConfig {
        DashboardConfig::default()
            .with_health_window(self.window())
            .with_stats_window(self.window())
            .with_top_errors(self.window(), self.top_errors_limit)
            .with_default_thresholds(
                self.error_threshold_per_hour as f64 / 60.0,
                self.warning_threshold_per_hour as f64 / 60.0,
            )
    }
}

/// Delivery retry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySection {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Wait after the first failure.
    pub initial_delay_ms: u64,
    /// Multiplier applied to each later wait.
    pub backoff_multiplier: f64,
    /// Upper bound for a single wait.
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            backoff_multiplier: 1.5,
            max_delay_ms: 30_000,
        }
    }
}

impl RetrySection {
    /// The retry policy.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_backoff_multiplier(self.backoff_multiplier)
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
    }
}

/// Notification settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationSection {
    /// Retry policy for every channel.
    pub retry: RetrySection,
    /// SMTP relay. Email is disabled without one.
    pub smtp: Option<SmtpSettings>,
    /// Sender address for alert emails.
    pub from: Option<String>,
    /// Per-request webhook timeout.
    pub webhook_timeout_secs: u64,
}

impl Default for NotificationSection {
    fn default() -> Self {
        Self {
            retry: RetrySection::default(),
            smtp: None,
            from: None,
            webhook_timeout_secs: 10,
        }
    }
}

impl NotificationSection {
    /// Webhook request timeout.
    #[must_use]
    pub const fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

/// Retention of raw logs and rollups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetentionSection {
    /// Raw log entries.
    pub raw_logs_hours: u64,
    /// Minute rollups.
    pub minute_rows_hours: u64,
    /// Hourly rollups.
    pub hourly_rows_days: u64,
    /// Daily rollups.
    pub daily_rows_days: u64,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            raw_logs_hours: 24,
            minute_rows_hours: 24,
            hourly_rows_days: 30,
            daily_rows_days: 365,
        }
    }
}

impl RetentionSection {
    const HOUR_SECS: u64 = 60 * 60;
    const DAY_SECS: u64 = 24 * Self::HOUR_SECS;

    /// The retention policy.
    #[must_use]
    pub const fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            raw_logs: hours(self.raw_logs_hours),
            minute: hours(self.minute_rows_hours),
            hour: days(self.hourly_rows_days),
            day: days(self.daily_rows_days),
        }
    }
}

const fn hours(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(RetentionSection::HOUR_SECS))
}

const fn days(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(RetentionSection::DAY_SECS))
}

/// Main engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Job intervals.
    pub scheduler: SchedulerSection,
    /// Dashboard cache.
    pub cache: CacheSection,
    /// Service health.
    pub health: HealthSection,
    /// Notification delivery.
    pub notifications: NotificationSection,
    /// Raw log and rollup retention.
    pub retention: RetentionSection,
    /// Alert configs loaded at startup.
    pub alerts: Vec<AlertConfig>,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Emit logs as JSON.
    pub json_logs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSection::default(),
            cache: CacheSection::default(),
            health: HealthSection::default(),
            notifications: NotificationSection::default(),
            retention: RetentionSection::default(),
            alerts: Vec::new(),
            log_filter: "info".to_string(),
            json_logs: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| EngineError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            (
                "scheduler.aggregation_interval_secs",
                self.scheduler.aggregation_interval_secs,
            ),
            ("scheduler.daily_interval_secs", self.scheduler.daily_interval_secs),
            (
                "scheduler.health_check_interval_secs",
                self.scheduler.health_check_interval_secs,
            ),
            ("cache.ttl_secs", self.cache.ttl_secs),
            ("cache.sweep_interval_secs", self.cache.sweep_interval_secs),
            ("health.window_secs", self.health.window_secs),
            (
                "notifications.webhook_timeout_secs",
                self.notifications.webhook_timeout_secs,
            ),
            ("retention.raw_logs_hours", self.retention.raw_logs_hours),
            ("retention.minute_rows_hours", self.retention.minute_rows_hours),
            ("retention.hourly_rows_days", self.retention.hourly_rows_days),
            ("retention.daily_rows_days", self.retention.daily_rows_days),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(EngineError::Config(format!("{name} must be greater than 0")));
            }
        }

        if self.retention.policy().raw_logs < self.health.window() {
            return Err(EngineError::Config(
                "retention.raw_logs_hours must cover health.window_secs".to_string(),
            ));
        }

        if self.health.top_errors_limit == 0 {
            return Err(EngineError::Config(
                "health.top_errors_limit must be greater than 0".to_string(),
            ));
        }

        let retry = &self.notifications.retry;
        if retry.max_attempts == 0 {
            return Err(EngineError::Config(
                "notifications.retry.max_attempts must be greater than 0".to_string(),
            ));
        }
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            return Err(EngineError::Config(
                "notifications.retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }

        match (&self.notifications.smtp, &self.notifications.from) {
            (Some(smtp), Some(from)) => {
                if smtp.host.is_empty() {
                    return Err(EngineError::Config(
                        "notifications.smtp.host cannot be empty".to_string(),
                    ));
                }
                parse_address(from)
                    .map_err(|e| EngineError::Config(format!("notifications.from: {e}")))?;
            }
            (Some(_), None) => {
                return Err(EngineError::Config(
                    "notifications.from is required when notifications.smtp is set".to_string(),
                ));
            }
            (None, _) => {}
        }

        let mut seen = HashSet::new();
        for alert in &self.alerts {
            alert
                .validate()
                .map_err(|e| EngineError::Config(format!("alerts: {e}")))?;
            if !seen.insert(alert.service.as_str()) {
                return Err(EngineError::Config(format!(
                    "alerts: duplicate config for service '{}'",
                    alert.service
                )));
            }
        }

        Ok(())
    }
}
