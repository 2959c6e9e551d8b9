//! # beacon-logs
//!
//! Log data model and time-bucketed aggregation for Beacon.
//!
//! This crate provides:
//!
//! - [`LogEntry`] — Structured log entries attributed to a service
//! - [`LogLevel`] — Severity levels (Debug, Info, Warn, Error, Critical)
//! - [`TimeWindow`] / [`Granularity`] — Query windows and rollup bucket sizes
//! - [`LogRepository`] / [`StatStore`] — Storage collaborator traits
//! - [`InMemoryLogRepository`] / [`InMemoryStatStore`] — In-memory backends
//! - [`LogAggregationService`] — Recomputes and publishes rollups
//! - [`RetentionPolicy`] — How long raw entries and rollups are kept
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use beacon_logs::{
//!     Granularity, InMemoryLogRepository, InMemoryStatStore, LogAggregationService, LogEntry,
//!     LogLevel, TimeWindow,
//! };
//! use chrono::{TimeDelta, Utc};
//!
//! let repo = Arc::new(InMemoryLogRepository::new());
//! let now = Utc::now();
//! repo.append(
//!     LogEntry::builder()
//!         .timestamp(now - TimeDelta::minutes(5))
//!         .level(LogLevel::Error)
//!         .service("checkout")
//!         .message("payment declined")
//!         .build()
//!         .unwrap(),
//! );
//!
//! let service = LogAggregationService::new(repo, Arc::new(InMemoryStatStore::new()));
//! let window = TimeWindow::last(TimeDelta::hours(1), now).unwrap();
//! let rows = service.aggregate(Granularity::Minute, &window).unwrap();
//! assert_eq!(rows.iter().map(|r| r.count).sum::<u64>(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregation;
pub mod error;
pub mod retention;
pub mod store;
pub mod traits;
pub mod types;

pub use aggregation::LogAggregationService;
pub use error::{LogError, Result};
pub use retention::{PruneReport, RetentionPolicy};
pub use store::{InMemoryLogRepository, InMemoryStatStore, LogRepositoryConfig};
pub use traits::{LogRepository, StatStore};
pub use types::{
    AggregatedStat, Bucket, Granularity, LevelCounts, LogEntry, LogEntryBuilder, LogId, LogLevel,
    MessageCount, ServiceLevelCount, ServiceRollup, StatKey, TimeWindow, ratio,
};
