//! Error types for log storage and aggregation.

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

/// Errors that can occur while reading logs or publishing aggregated stats.
#[derive(Debug, Error)]
pub enum LogError {
    /// A required field was not provided.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A time window whose start is not before its end.
    #[error("invalid time window: start {start} is not before end {end}")]
    InvalidWindow {
        /// Requested start.
        start: DateTime<Utc>,
        /// Requested end.
        end: DateTime<Utc>,
    },

    /// A window whose start would fall outside the representable time range.
    #[error("time window of {span} ending at {end} is out of range")]
    WindowOutOfRange {
        /// Requested length.
        span: TimeDelta,
        /// Requested end.
        end: DateTime<Utc>,
    },

    /// A level string that does not name a known log level.
    #[error("unknown log level: {0}")]
    UnknownLevel(String),

    /// The log repository failed to answer a query.
    #[error("log repository error: {0}")]
    Repository(String),

    /// The stat store rejected a publish.
    #[error("stat store error: {0}")]
    StatStore(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for log operations.
pub type Result<T> = std::result::Result<T, LogError>;
