//! Execution history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{Result, SchedulerError};
use crate::types::{ExecutionId, ExecutionStatus, JobExecution, JobType};

/// Persistence for [`JobExecution`] records.
pub trait ExecutionStore: Send + Sync {
    /// Records a `running` execution.
    fn start(&self, execution: &JobExecution) -> Result<()>;

    /// Completes a running execution. `error_message` marks it failed.
    fn complete(
        &self,
        id: ExecutionId,
        completed_at: DateTime<Utc>,
        error_message: Option<String>,
    ) -> Result<JobExecution>;

    /// Latest executions of one job, newest first.
    fn history(&self, job_type: &JobType, limit: usize) -> Vec<JobExecution>;

    /// Latest executions of every job, newest first.
    fn recent(&self, limit: usize) -> Vec<JobExecution>;

    /// Failed executions started at or after `since`, newest first.
    fn failures(&self, since: DateTime<Utc>) -> Vec<JobExecution>;
}

/// Configuration for [`InMemoryExecutionStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionStoreConfig {
    /// Records kept before the oldest finished ones are dropped.
    pub max_executions: usize,
}

impl Default for ExecutionStoreConfig {
    fn default() -> Self {
        Self {
            max_executions: 1_000,
        }
    }
}

/// Bounded in-memory execution history.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<VecDeque<JobExecution>>,
    config: ExecutionStoreConfig,
}

impl InMemoryExecutionStore {
    /// Create a store with default retention.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given retention.
    #[must_use]
    pub fn with_config(config: ExecutionStoreConfig) -> Self {
        Self {
            executions: RwLock::new(VecDeque::new()),
            config,
        }
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executions.read().len()
    }

    /// Returns true if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn collect_newest(
        &self,
        limit: usize,
        keep: impl Fn(&JobExecution) -> bool,
    ) -> Vec<JobExecution> {
        self.executions
            .read()
            .iter()
            .rev()
            .filter(|e| keep(e))
            .take(limit)
            .cloned()
            .collect()
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    fn start(&self, execution: &JobExecution) -> Result<()> {
        let mut executions = self.executions.write();
        executions.push_back(execution.clone());

        // running records are never dropped
        while executions.len() > self.config.max_executions {
            let Some(pos) = executions.iter().position(|e| e.status.is_finished()) else {
                break;
            };
            executions.remove(pos);
        }
        Ok(())
    }

    fn complete(
        &self,
        id: ExecutionId,
        completed_at: DateTime<Utc>,
        error_message: Option<String>,
    ) -> Result<JobExecution> {
        let mut executions = self.executions.write();
        let execution = executions
            .iter_mut()
            .rev()
            .find(|e| e.id == id)
            .ok_or_else(|| SchedulerError::History {
                reason: format!("execution {id} not found"),
            })?;
        if execution.status.is_finished() {
            return Err(SchedulerError::History {
                reason: format!("execution {id} already completed"),
            });
        }
        execution.finish(completed_at, error_message);
        Ok(execution.clone())
    }

    fn history(&self, job_type: &JobType, limit: usize) -> Vec<JobExecution> {
        self.collect_newest(limit, |e| &e.job_type == job_type)
    }

    fn recent(&self, limit: usize) -> Vec<JobExecution> {
        self.collect_newest(limit, |_| true)
    }

    fn failures(&self, since: DateTime<Utc>) -> Vec<JobExecution> {
        self.collect_newest(usize::MAX, |e| {
            e.status == ExecutionStatus::Failed && e.started_at >= since
        })
    }
}
