//! Core types for threshold alerting.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AlertError, Result};

/// Per-service alert thresholds and notification targets.
///
/// Owned by operators; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Service the thresholds apply to. Unique across configs.
    pub service: String,
    /// Errors per minute above which an error violation is raised.
    #[serde(default)]
    pub error_threshold_per_min: u64,
    /// Warnings per minute above which a warning violation is raised.
    #[serde(default)]
    pub warning_threshold_per_min: u64,
    /// Email recipient, if email notification is wanted.
    #[serde(default)]
    pub alert_email: Option<String>,
    /// Webhook target, if webhook notification is wanted.
    #[serde(default)]
    pub alert_webhook_url: Option<String>,
    /// Disabled configs are never evaluated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// When the config was created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// When the config was last changed.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

const fn default_enabled() -> bool {
    true
}

impl AlertConfig {
    /// Creates an enabled config with the given thresholds and no channels.
    #[must_use]
    pub fn new(service: impl Into<String>, error_threshold: u64, warning_threshold: u64) -> Self {
        let now = Utc::now();
        Self {
            service: service.into(),
            error_threshold_per_min: error_threshold,
            warning_threshold_per_min: warning_threshold,
            alert_email: None,
            alert_webhook_url: None,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the email recipient.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.alert_email = Some(email.into());
        self
    }

    /// Sets the webhook URL.
    #[must_use]
    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.alert_webhook_url = Some(url.into());
        self
    }

    /// Enables or disables the config.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Threshold for the given violation level.
    #[must_use]
    pub const fn threshold(&self, level: ViolationLevel) -> u64 {
        match level {
            ViolationLevel::Error => self.error_threshold_per_min,
            ViolationLevel::Warning => self.warning_threshold_per_min,
        }
    }

    /// True if at least one notification channel is named.
    #[must_use]
    pub const fn has_channels(&self) -> bool {
        self.alert_email.is_some() || self.alert_webhook_url.is_some()
    }

    /// Validates the config.
    ///
    /// Channel targets are only checked for presence here; address and URL
    /// syntax are checked by the notifier before delivery.
    pub fn validate(&self) -> Result<()> {
        if self.service.trim().is_empty() {
            return Err(AlertError::InvalidConfig {
                reason: "service name cannot be empty".to_string(),
            });
        }
        if self.alert_email.as_deref().is_some_and(|e| e.trim().is_empty()) {
            return Err(AlertError::InvalidConfig {
                reason: format!("{}: alert email is set but empty", self.service),
            });
        }
        if self
            .alert_webhook_url
            .as_deref()
            .is_some_and(|u| u.trim().is_empty())
        {
            return Err(AlertError::InvalidConfig {
                reason: format!("{}: webhook url is set but empty", self.service),
            });
        }
        if self.updated_at < self.created_at {
            return Err(AlertError::InvalidConfig {
                reason: format!("{}: updated_at precedes created_at", self.service),
            });
        }
        Ok(())
    }
}

/// Severity class a violation was raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationLevel {
    /// `ERROR` and `CRITICAL` logs.
    Error,
    /// `WARN` logs.
    Warning,
}

impl ViolationLevel {
    /// Returns the string representation of this level.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

impl fmt::Display for ViolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier for a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViolationId(pub Uuid);

impl ViolationId {
    /// Generates a fresh random ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ViolationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ViolationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A recorded threshold breach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertViolation {
    /// Unique identifier.
    pub id: ViolationId,
    /// Service that breached.
    pub service: String,
    /// Which threshold was breached.
    pub level: ViolationLevel,
    /// Observed per-minute count.
    pub current_count: f64,
    /// The threshold that was exceeded.
    pub threshold_value: u64,
    /// Start of the bucket that was evaluated; identifies the evaluation cycle.
    pub window_start: DateTime<Utc>,
    /// When the breach was detected.
    pub detected_at: DateTime<Utc>,
    /// When notification was attempted; `None` while pending.
    pub notified_at: Option<DateTime<Utc>>,
    /// Why notification failed, if it did.
    pub delivery_error: Option<String>,
}

impl AlertViolation {
    /// Creates a pending violation.
    #[must_use]
    pub fn new(
        service: impl Into<String>,
        level: ViolationLevel,
        current_count: f64,
        threshold_value: u64,
        window_start: DateTime<Utc>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ViolationId::new(),
            service: service.into(),
            level,
            current_count,
            threshold_value,
            window_start,
            detected_at,
            notified_at: None,
            delivery_error: None,
        }
    }

    /// True until a notification attempt has been stamped.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.notified_at.is_none()
    }

    /// Key used to deduplicate violations within one evaluation cycle.
    #[must_use]
    pub fn cycle_key(&self) -> CycleKey {
        CycleKey {
            service: self.service.clone(),
            level: self.level,
            window_start: self.window_start,
        }
    }

    /// The JSON body posted to webhooks.
    #[must_use]
    pub fn payload(&self) -> ViolationPayload {
        ViolationPayload {
            service: self.service.clone(),
            level: self.level,
            current_count: self.current_count,
            threshold_value: self.threshold_value,
            detected_at: self.detected_at,
        }
    }

    /// Email subject line.
    #[must_use]
    pub fn subject(&self) -> String {
        format!("Alert: {} - {} threshold exceeded", self.service, self.level)
    }

    /// Plain-text email body.
    #[must_use]
    pub fn body(&self) -> String {
        format!(
            concat!(
                "Alert threshold exceeded\n\n",
                "Service: {}\nLevel: {}\nCurrent Count: {}\nThreshold: {}\nTime: {}\n",
            ),
            self.service,
            self.level,
            self.current_count,
            self.threshold_value,
            self.detected_at.to_rfc3339(),
        )
    }
}

/// Deduplication key: one violation per service, level and evaluated bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CycleKey {
    /// Service name.
    pub service: String,
    /// Violation level.
    pub level: ViolationLevel,
    /// Evaluated bucket start.
    pub window_start: DateTime<Utc>,
}

/// Webhook request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationPayload {
    /// Service that breached.
    pub service: String,
    /// Which threshold was breached.
    pub level: ViolationLevel,
    /// Observed per-minute count.
    pub current_count: f64,
    /// The threshold that was exceeded.
    pub threshold_value: u64,
    /// When the breach was detected.
    pub detected_at: DateTime<Utc>,
}
