//! Error types for dashboard reads and the stats cache.

use beacon_alerts::AlertError;
use beacon_logs::LogError;
use thiserror::Error;

/// Result type alias for dashboard operations.
pub type DashboardResult<T> = Result<T, DashboardError>;

/// Errors that can occur while computing dashboard statistics.
#[derive(Debug, Error)]
pub enum DashboardError {
    /// The log repository or stat store failed.
    #[error("log query failed: {0}")]
    Logs(#[from] LogError),

    /// The alert config source failed.
    #[error("alert config lookup failed: {0}")]
    Alerts(#[from] AlertError),

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Cache keys must be non-empty.
    #[error("cache key cannot be empty")]
    EmptyCacheKey,
}
