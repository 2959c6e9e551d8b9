//! Error types for beacond.

use beacon_alerts::{AlertError, NotifyError};
use beacon_dashboard::DashboardError;
use beacon_logs::LogError;
use beacon_scheduler::SchedulerError;
use thiserror::Error;

/// Errors raised while configuring or running the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Aggregation or log repository error.
    #[error("aggregation failed: {0}")]
    Logs(#[from] LogError),

    /// Alert evaluation or store error.
    #[error("alerting failed: {0}")]
    Alerts(#[from] AlertError),

    /// Notification transport setup error.
    #[error("notification setup failed: {0}")]
    Notify(#[from] NotifyError),

    /// Dashboard or cache error.
    #[error("dashboard error: {0}")]
    Dashboard(#[from] DashboardError),

    /// Scheduler error.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
