//! Error types for the beacon-scheduler crate.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The job definition is invalid.
    #[error("invalid job {job_type}: {reason}")]
    InvalidJob {
        /// The job being registered.
        job_type: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A job with the same type is already registered.
    #[error("job already registered: {job_type}")]
    DuplicateJob {
        /// The duplicated job type.
        job_type: String,
    },

    /// No job with this type is registered.
    #[error("job not found: {job_type}")]
    JobNotFound {
        /// The unknown job type.
        job_type: String,
    },

    /// The job is executing; manual triggers do not queue.
    #[error("job is already running: {job_type}")]
    JobBusy {
        /// The busy job type.
        job_type: String,
    },

    /// The scheduler has already been started.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// The scheduler has not been started.
    #[error("scheduler is not running")]
    NotRunning,

    /// The scheduler has been stopped and cannot be restarted.
    #[error("scheduler has been stopped")]
    Stopped,

    /// In-flight executions did not finish within the grace period and were cancelled.
    #[error("in-flight jobs did not finish within {grace:?}")]
    StopTimeout {
        /// The grace period that elapsed.
        grace: Duration,
    },

    /// The execution history store failed.
    #[error("execution history error: {reason}")]
    History {
        /// The reason the store failed.
        reason: String,
    },

    /// The spawned execution ended without reporting a result.
    #[error("execution of {job_type} was aborted")]
    Aborted {
        /// The aborted job type.
        job_type: String,
    },
}

impl SchedulerError {
    /// Returns true if this error rejects a job definition.
    #[must_use]
    pub const fn is_registration_error(&self) -> bool {
        matches!(self, Self::InvalidJob { .. } | Self::DuplicateJob { .. })
    }
}

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SchedulerError::JobBusy {
            job_type: "aggregation".to_string(),
        };
        assert_eq!(err.to_string(), "job is already running: aggregation");

        let err = SchedulerError::StopTimeout {
            grace: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "in-flight jobs did not finish within 5s");
    }

    #[test]
    fn registration_errors() {
        assert!(SchedulerError::DuplicateJob {
            job_type: "a".to_string()
        }
        .is_registration_error());
        assert!(!SchedulerError::NotRunning.is_registration_error());
    }
}
