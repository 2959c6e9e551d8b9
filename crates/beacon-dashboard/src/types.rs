//! Dashboard data types.

use std::collections::BTreeMap;
use std::fmt;

use beacon_logs::{LevelCounts, LogLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Within thresholds.
    #[serde(rename = "OK")]
    Ok,
    /// Warning rate above threshold.
    #[serde(rename = "Warning")]
    Warning,
    /// Error rate above threshold.
    #[serde(rename = "Error")]
    Error,
    /// Counts could not be read.
    #[serde(rename = "Unknown")]
    Unknown,
}

impl HealthStatus {
    /// Returns the string representation of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detailed health record for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    /// Service name.
    pub service: String,
    /// Derived status.
    pub status: HealthStatus,
    /// `Error` plus `Critical` entries in the health window.
    pub error_count: u64,
    /// `Warn` entries in the health window.
    pub warning_count: u64,
    /// `Info` entries in the health window.
    pub info_count: u64,
    /// Errors per minute over the window.
    pub error_rate_per_min: f64,
    /// Warnings per minute over the window.
    pub warning_rate_per_min: f64,
    /// When the record was computed.
    pub last_checked_at: DateTime<Utc>,
}

impl ServiceHealth {
    /// A record for a service whose counts could not be read.
    #[must_use]
    pub fn unknown(service: impl Into<String>, checked_at: DateTime<Utc>) -> Self {
        Self {
            service: service.into(),
            status: HealthStatus::Unknown,
            error_count: 0,
            warning_count: 0,
            info_count: 0,
            error_rate_per_min: 0.0,
            warning_rate_per_min: 0.0,
            last_checked_at: checked_at,
        }
    }
}

/// Statistics for one service over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Service name.
    pub service: String,
    /// Window start.
    pub window_start: DateTime<Utc>,
    /// Window end (exclusive).
    pub window_end: DateTime<Utc>,
    /// Entries per level.
    pub counts: LevelCounts,
    /// All entries.
    pub total: u64,
    /// `Error` plus `Critical` entries.
    pub error_count: u64,
    /// `Warn` entries.
    pub warning_count: u64,
    /// `error_count / total`, 0 without entries.
    pub error_rate: f64,
    /// When the stats were computed.
    pub generated_at: DateTime<Utc>,
}

impl ServiceStats {
    /// Count at a single level.
    #[must_use]
    pub fn count(&self, level: LogLevel) -> u64 {
        self.counts.get(level)
    }
}

/// Per-service line in [`GlobalStats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSummary {
    /// Service name.
    pub service: String,
    /// Health over the statistics window; `Unknown` if the service's counts failed.
    pub status: HealthStatus,
    /// All entries.
    pub total: u64,
    /// `Error` plus `Critical` entries.
    pub error_count: u64,
    /// `error_count / total`.
    pub error_rate: f64,
}

/// Totals across every service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    /// Window start.
    pub window_start: DateTime<Utc>,
    /// Window end (exclusive).
    pub window_end: DateTime<Utc>,
    /// Entries per level across readable services.
    pub counts: LevelCounts,
    /// All entries across readable services.
    pub total: u64,
    /// `Error` plus `Critical` across readable services.
    pub error_count: u64,
    /// `error_count / total`.
    pub error_rate: f64,
    /// One line per service, sorted by name.
    pub services: Vec<ServiceSummary>,
    /// When the stats were computed.
    pub generated_at: DateTime<Utc>,
}

impl GlobalStats {
    /// Services that could not be read.
    pub fn unknown_services(&self) -> impl Iterator<Item = &str> {
        self.services
            .iter()
            .filter(|s| s.status == HealthStatus::Unknown)
            .map(|s| s.service.as_str())
    }
}

/// A frequent error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Service that emitted it.
    pub service: String,
    /// Message text.
    pub message: String,
    /// Most severe level seen.
    pub level: LogLevel,
    /// Occurrences in the window.
    pub count: u64,
    /// Latest occurrence.
    pub last_seen: DateTime<Utc>,
}

/// Everything the dashboard page shows, assembled from cached parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    /// Global totals.
    pub global: GlobalStats,
    /// Health by service.
    pub health: BTreeMap<String, ServiceHealth>,
    /// Most frequent errors.
    pub top_errors: Vec<ErrorSummary>,
    /// Per-service statistics.
    pub services: BTreeMap<String, ServiceStats>,
    /// Cache keys that were served without recomputation.
    pub cached_keys: Vec<String>,
    /// Cache keys that were recomputed for this snapshot.
    pub recomputed_keys: Vec<String>,
    /// When the snapshot was assembled.
    pub generated_at: DateTime<Utc>,
}
