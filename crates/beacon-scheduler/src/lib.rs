//! # beacon-scheduler
//!
//! Interval job scheduling for Beacon's background work.
//!
//! This crate provides:
//!
//! - [`Scheduler`] — Runs registered jobs on their own tickers without overlapping runs
//! - [`ExecutionStore`] — History of [`JobExecution`] records, with an in-memory implementation
//! - [`JobStatus`] — Point-in-time view of a job's state and counters
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use beacon_scheduler::{InMemoryExecutionStore, Scheduler};
//!
//! # async fn example() -> beacon_scheduler::Result<()> {
//! let scheduler = Scheduler::new(Arc::new(InMemoryExecutionStore::new()));
//! scheduler.register("aggregation", Duration::from_secs(60), |_cancel| async {
//!     Ok::<_, String>(())
//! })?;
//!
//! scheduler.start()?;
//! // ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod history;
pub mod scheduler;
pub mod types;

pub use error::{Result, SchedulerError};
pub use history::{ExecutionStore, ExecutionStoreConfig, InMemoryExecutionStore};
pub use scheduler::{Scheduler, StopOutcome};
pub use types::{ExecutionId, ExecutionStatus, JobExecution, JobState, JobStatus, JobType};
