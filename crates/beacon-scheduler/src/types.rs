//! Job and execution records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of a registered job, e.g. `aggregation`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    /// Create a job type.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the job name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for JobType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Unique identifier of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    /// Generate a new random execution ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Started, not finished.
    Running,
    /// Finished without error.
    Success,
    /// Finished with an error or panicked.
    Failed,
}

impl ExecutionStatus {
    /// Returns true once the execution has finished.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One execution of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExecution {
    /// Execution ID.
    pub id: ExecutionId,
    /// Job that ran.
    pub job_type: JobType,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time, once finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Current status.
    pub status: ExecutionStatus,
    /// Error text of a failed execution.
    pub error_message: Option<String>,
    /// True if started by a manual trigger rather than a tick.
    pub manual: bool,
}

impl JobExecution {
    /// A `running` record.
    #[must_use]
    pub fn started(
        id: ExecutionId,
        job_type: JobType,
        started_at: DateTime<Utc>,
        manual: bool,
    ) -> Self {
        Self {
            id,
            job_type,
            started_at,
            completed_at: None,
            status: ExecutionStatus::Running,
            error_message: None,
            manual,
        }
    }

    /// Marks the record finished.
    pub fn finish(&mut self, completed_at: DateTime<Utc>, error_message: Option<String>) {
        self.completed_at = Some(completed_at);
        self.status = if error_message.is_some() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Success
        };
        self.error_message = error_message;
    }

    /// Wall-clock duration of a finished execution.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::TimeDelta> {
        self.completed_at.map(|end| end - self.started_at)
    }
}

/// Scheduling state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for the next tick.
    Idle,
    /// An execution is in flight.
    Running,
    /// The scheduler has stopped; no further runs.
    Stopped,
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Job name.
    pub job_type: JobType,
    /// Current state.
    pub state: JobState,
    /// Tick interval.
    pub interval_ms: u64,
    /// Start of the latest execution.
    pub last_started_at: Option<DateTime<Utc>>,
    /// End of the latest finished execution.
    pub last_finished_at: Option<DateTime<Utc>>,
    /// When the next tick is due, while the scheduler runs.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Executions started.
    pub runs: u64,
    /// Ticks dropped because an execution was in flight.
    pub skipped_ticks: u64,
    /// Status of the latest execution.
    pub last_status: Option<ExecutionStatus>,
}
