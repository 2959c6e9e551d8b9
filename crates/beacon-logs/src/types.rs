//! Core types for log aggregation.
//!
//! This module provides:
//! - [`LogLevel`] — Severity levels for log entries
//! - [`LogEntry`] — A single structured log line attributed to a service
//! - [`TimeWindow`] — Half-open `[start, end)` query windows
//! - [`Granularity`] — Bucket sizes used for rollups
//! - [`AggregatedStat`] — One rolled-up `(bucket, service, level)` count

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};

/// Unique identifier for a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogId(pub u64);

/// Log severity levels, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Debugging information
    #[serde(alias = "debug")]
    Debug,
    /// General information
    #[serde(alias = "info")]
    Info,
    /// Warning conditions
    #[serde(alias = "warn", alias = "warning", alias = "WARNING")]
    Warn,
    /// Error conditions
    #[serde(alias = "error")]
    Error,
    /// Failures that need immediate attention
    #[serde(alias = "critical")]
    Critical,
}

impl LogLevel {
    /// Every level, least severe first.
    pub const ALL: [Self; 5] = [
        Self::Debug,
        Self::Info,
        Self::Warn,
        Self::Error,
        Self::Critical,
    ];

    /// Levels that count towards error thresholds and error rates.
    pub const ERROR_CLASS: [Self; 2] = [Self::Error, Self::Critical];

    /// Returns true if this level is at least as severe as the given level.
    #[must_use]
    pub fn is_at_least(&self, level: Self) -> bool {
        *self >= level
    }

    /// Returns true for `Error` and `Critical`.
    #[must_use]
    pub const fn is_error_class(&self) -> bool {
        matches!(self, Self::Error | Self::Critical)
    }

    /// Returns the string representation of this level.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            _ => Err(LogError::UnknownLevel(s.to_string())),
        }
    }
}

/// A structured log entry. Read-only from the engine's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unique identifier for this entry
    #[serde(default = "LogEntry::unassigned_id")]
    pub id: LogId,
    /// When the log was created
    pub timestamp: DateTime<Utc>,
    /// Severity level
    pub level: LogLevel,
    /// Service that emitted the log
    pub service: String,
    /// The log message
    pub message: String,
}

impl LogEntry {
    /// Creates a new log entry builder.
    #[must_use]
    pub fn builder() -> LogEntryBuilder {
        LogEntryBuilder::default()
    }

    const fn unassigned_id() -> LogId {
        LogId(0)
    }
}

/// Builder for constructing log entries.
#[derive(Debug, Default)]
pub struct LogEntryBuilder {
    id: Option<LogId>,
    timestamp: Option<DateTime<Utc>>,
    level: Option<LogLevel>,
    service: Option<String>,
    message: Option<String>,
}

impl LogEntryBuilder {
    /// Sets the log ID. Repositories assign one when left unset.
    #[must_use]
    pub const fn id(mut self, id: LogId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the log level.
    #[must_use]
    pub const fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    /// Sets the emitting service.
    #[must_use]
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Builds the log entry.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::MissingField`] if timestamp, level, service or message is unset.
    pub fn build(self) -> Result<LogEntry> {
        let timestamp = self.timestamp.ok_or(LogError::MissingField("timestamp"))?;
        let level = self.level.ok_or(LogError::MissingField("level"))?;
        let service = self.service.ok_or(LogError::MissingField("service"))?;
        let message = self.message.ok_or(LogError::MissingField("message"))?;

        Ok(LogEntry {
            id: self.id.unwrap_or(LogId(0)),
            timestamp,
            level,
            service,
            message,
        })
    }
}

/// Half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a window, rejecting empty or inverted ranges.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(LogError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// The window of length `span` ending at `now`.
    pub fn last(span: TimeDelta, now: DateTime<Utc>) -> Result<Self> {
        let start = now
            .checked_sub_signed(span)
            .ok_or(LogError::WindowOutOfRange { span, end: now })?;
        Self::new(start, now)
    }

    /// Inclusive start.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive end.
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Length of the window.
    #[must_use]
    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Length of the window in (fractional) minutes.
    #[must_use]
    pub fn minutes(&self) -> f64 {
        self.duration().num_milliseconds() as f64 / 60_000.0
    }

    /// Checks if a timestamp falls within this window.
    #[must_use]
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Splits the window into buckets aligned to `granularity`.
    ///
    /// The first and last bucket ranges are clipped to the window, so a bucket's
    /// `range` may be shorter than the granularity while its `start` stays aligned.
    #[must_use]
    pub fn buckets(&self, granularity: Granularity) -> Vec<Bucket> {
        let step = granularity.delta();
        let mut buckets = Vec::new();
        let mut cursor = granularity.truncate(self.start);

        while cursor < self.end {
            let next = cursor + step;
            buckets.push(Bucket {
                start: cursor,
                range: Self {
                    start: cursor.max(self.start),
                    end: next.min(self.end),
                },
            });
            cursor = next;
        }

        buckets
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// One aligned bucket of a [`TimeWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    /// Aligned bucket start; the key under which stats are stored.
    pub start: DateTime<Utc>,
    /// Portion of the bucket covered by the originating window.
    pub range: TimeWindow,
}

/// Size of a rollup bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One-minute buckets, used for per-minute alert thresholds.
    Minute,
    /// Hourly buckets.
    Hour,
    /// Daily buckets (UTC midnight aligned).
    Day,
}

impl Granularity {
    /// Bucket length.
    #[must_use]
    pub fn delta(&self) -> TimeDelta {
        TimeDelta::seconds(self.seconds())
    }

    /// Bucket length in seconds.
    #[must_use]
    pub const fn seconds(&self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
        }
    }

    /// Bucket length in minutes.
    #[must_use]
    pub const fn minutes(&self) -> i64 {
        self.seconds() / 60
    }

    /// Aligns a timestamp down to the start of its bucket.
    #[must_use]
    pub fn truncate(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let secs = timestamp.timestamp();
        let aligned = secs - secs.rem_euclid(self.seconds());
        DateTime::from_timestamp(aligned, 0).unwrap_or(timestamp)
    }

    /// Returns the string representation of this granularity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw count of logs for one `(service, level)` pair, as answered by a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLevelCount {
    /// Service name
    pub service: String,
    /// Log level
    pub level: LogLevel,
    /// Number of matching entries
    pub count: u64,
}

/// A rolled-up count for one `(bucket_start, granularity, service, level)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedStat {
    /// Aligned start of the bucket
    pub bucket_start: DateTime<Utc>,
    /// Bucket size
    pub granularity: Granularity,
    /// Service name
    pub service: String,
    /// Log level
    pub level: LogLevel,
    /// Number of entries in the bucket
    pub count: u64,
}

impl AggregatedStat {
    /// Natural key of the row; at most one row exists per key.
    #[must_use]
    pub fn key(&self) -> StatKey {
        StatKey {
            granularity: self.granularity,
            bucket_start: self.bucket_start,
            service: self.service.clone(),
            level: self.level,
        }
    }
}

/// Natural key of an [`AggregatedStat`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatKey {
    /// Bucket size
    pub granularity: Granularity,
    /// Aligned start of the bucket
    pub bucket_start: DateTime<Utc>,
    /// Service name
    pub service: String,
    /// Log level
    pub level: LogLevel,
}

/// Per-level log counts for one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts(BTreeMap<LogLevel, u64>);

impl LevelCounts {
    /// Creates an empty set of counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `count` entries at `level`.
    pub fn add(&mut self, level: LogLevel, count: u64) {
        *self.0.entry(level).or_insert(0) += count;
    }

    /// Count at a single level.
    #[must_use]
    pub fn get(&self, level: LogLevel) -> u64 {
        self.0.get(&level).copied().unwrap_or(0)
    }

    /// Count across all levels.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    /// `Error` plus `Critical`.
    #[must_use]
    pub fn errors(&self) -> u64 {
        LogLevel::ERROR_CLASS.iter().map(|l| self.get(*l)).sum()
    }

    /// `Warn` count.
    #[must_use]
    pub fn warnings(&self) -> u64 {
        self.get(LogLevel::Warn)
    }

    /// Fraction of entries in the error class, 0 when there are no entries.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        ratio(self.errors(), self.total())
    }

    /// Iterates non-zero `(level, count)` pairs, least severe first.
    pub fn iter(&self) -> impl Iterator<Item = (LogLevel, u64)> + '_ {
        self.0.iter().map(|(l, c)| (*l, *c))
    }
}

impl FromIterator<(LogLevel, u64)> for LevelCounts {
    fn from_iter<I: IntoIterator<Item = (LogLevel, u64)>>(iter: I) -> Self {
        let mut counts = Self::new();
        for (level, count) in iter {
            counts.add(level, count);
        }
        counts
    }
}

/// How often one message appeared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCount {
    /// Service that emitted the message
    pub service: String,
    /// The message text
    pub message: String,
    /// Most severe level the message was seen at
    pub level: LogLevel,
    /// Number of occurrences
    pub count: u64,
    /// Timestamp of the latest occurrence
    pub last_seen: DateTime<Utc>,
}

/// Totals for one service derived from a set of [`AggregatedStat`] rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceRollup {
    /// Service name
    pub service: String,
    /// All entries
    pub total: u64,
    /// `Error` plus `Critical`
    pub error_count: u64,
    /// `Warn`
    pub warning_count: u64,
    /// `error_count / total`, 0 when `total` is 0
    pub error_rate: f64,
}

/// Divides, returning 0 for an empty denominator.
#[must_use]
pub fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
