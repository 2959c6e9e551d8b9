//! How long raw logs and published rollups are kept.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::types::Granularity;

/// Maximum age of raw entries and of each rollup granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Raw log entries.
    pub raw_logs: Duration,
    /// Minute rollups.
    pub minute: Duration,
    /// Hourly rollups.
    pub hour: Duration,
    /// Daily rollups.
    pub day: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            raw_logs: Duration::from_secs(24 * 60 * 60),
            minute: Duration::from_secs(24 * 60 * 60),
            hour: Duration::from_secs(30 * 24 * 60 * 60),
            day: Duration::from_secs(365 * 24 * 60 * 60),
        }
    }
}

impl RetentionPolicy {
    /// Set the raw log retention.
    #[must_use]
    pub const fn with_raw_logs(mut self, age: Duration) -> Self {
        self.raw_logs = age;
        self
    }

    /// Set the minute rollup retention.
    #[must_use]
    pub const fn with_minute(mut self, age: Duration) -> Self {
        self.minute = age;
        self
    }

    /// Set the hourly rollup retention.
    #[must_use]
    pub const fn with_hour(mut self, age: Duration) -> Self {
        self.hour = age;
        self
    }

    /// Set the daily rollup retention.
    #[must_use]
    pub const fn with_day(mut self, age: Duration) -> Self {
        self.day = age;
        self
    }

    /// Maximum age of rows of `granularity`.
    #[must_use]
    pub const fn for_granularity(&self, granularity: Granularity) -> Duration {
        match granularity {
            Granularity::Minute => self.minute,
            Granularity::Hour => self.hour,
            Granularity::Day => self.day,
        }
    }

    /// Oldest timestamp kept for `age` as of `now`.
    ///
    /// `None` when the cutoff falls outside chrono's range, meaning nothing is old enough to drop.
    #[must_use]
    pub fn cutoff(age: Duration, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        TimeDelta::from_std(age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
    }
}

/// Rows and entries removed by one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Raw log entries.
    pub raw_logs: usize,
    /// Minute rollup rows.
    pub minute_rows: usize,
    /// Hourly rollup rows.
    pub hourly_rows: usize,
    /// Daily rollup rows.
    pub daily_rows: usize,
}

impl PruneReport {
    /// Everything removed.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.raw_logs + self.minute_rows + self.hourly_rows + self.daily_rows
    }
}
