//! Traits for the storage collaborators the aggregation engine reads from and writes to.
//!
//! - [`LogRepository`] answers count and top-message queries over raw logs.
//! - [`StatStore`] holds the published [`AggregatedStat`] rows.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    AggregatedStat, Granularity, LevelCounts, LogLevel, MessageCount, ServiceLevelCount,
    TimeWindow,
};

/// Read access to raw log entries.
///
/// Implementations must be safe to share between the scheduler's jobs and
/// dashboard readers.
pub trait LogRepository: Send + Sync {
    /// Lists services that emitted at least one entry inside the window.
    fn services(&self, window: &TimeWindow) -> Result<Vec<String>>;

    /// Counts entries inside the window grouped by service and level.
    ///
    /// Pairs with zero entries may be omitted.
    fn count_by_service_and_level(&self, window: &TimeWindow) -> Result<Vec<ServiceLevelCount>>;

    /// Counts entries for one service (or all services when `None`) at any of `levels`.
    ///
    /// An empty `levels` slice matches every level.
    fn count(&self, service: Option<&str>, levels: &[LogLevel], window: &TimeWindow)
    -> Result<u64>;

    /// Per-level counts for one service inside the window.
    fn level_counts(&self, service: &str, window: &TimeWindow) -> Result<LevelCounts>;

    /// Most frequent messages for one service at any of `levels`, most frequent first.
    fn top_messages(
        &self,
        service: &str,
        levels: &[LogLevel],
        window: &TimeWindow,
        limit: usize,
    ) -> Result<Vec<MessageCount>>;

    /// Drops entries older than `cutoff`, returning how many were removed.
    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Storage for published rollups.
///
/// A bucket set is replaced as a whole: readers observe either every row of the
/// previous publish or every row of the new one.
pub trait StatStore: Send + Sync {
    /// Replaces every row of `granularity` whose bucket start lies in
    /// `[granularity.truncate(window.start), window.end)` with `stats`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot accept the new rows; the previous
    /// rows must then remain visible.
    fn replace_buckets(
        &self,
        granularity: Granularity,
        window: &TimeWindow,
        stats: Vec<AggregatedStat>,
    ) -> Result<()>;

    /// Rows of `granularity` whose bucket start lies inside the window,
    /// optionally limited to one service. Ordered by bucket, service, level.
    fn query(
        &self,
        granularity: Granularity,
        window: &TimeWindow,
        service: Option<&str>,
    ) -> Vec<AggregatedStat>;

    /// Drops every `granularity` row whose bucket starts before `cutoff`.
    ///
    /// Returns how many rows were removed.
    fn prune_before(&self, granularity: Granularity, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Returns the number of stored rows.
    fn len(&self) -> usize;

    /// Returns true if the store holds no rows.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
