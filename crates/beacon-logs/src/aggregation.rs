//! Time-bucketed rollups of raw logs.
//!
//! [`LogAggregationService`] recomputes `(bucket, service, level)` counts from a
//! [`LogRepository`] and publishes them to a [`StatStore`]. A recompute builds the
//! complete row set before touching the store, so a failing query leaves the
//! previously published rows in place.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::retention::{PruneReport, RetentionPolicy};
use crate::traits::{LogRepository, StatStore};
use crate::types::{
    AggregatedStat, Granularity, LevelCounts, LogLevel, ServiceRollup, TimeWindow, ratio,
};

/// Computes and publishes rollups.
#[derive(Clone)]
pub struct LogAggregationService {
    repository: Arc<dyn LogRepository>,
    stats: Arc<dyn StatStore>,
}

impl LogAggregationService {
    /// Creates a service over the given collaborators.
    pub fn new(repository: Arc<dyn LogRepository>, stats: Arc<dyn StatStore>) -> Self {
        Self { repository, stats }
    }

    /// The raw log repository.
    pub fn repository(&self) -> &Arc<dyn LogRepository> {
        &self.repository
    }

    /// The rollup store.
    pub fn stat_store(&self) -> &Arc<dyn StatStore> {
        &self.stats
    }

    /// Recomputes every `granularity` bucket overlapping `window` and publishes them.
    ///
    /// Bucket ranges are clipped to the window. Rows with a zero count are not
    /// produced. Running twice over unchanged logs yields identical rows.
    ///
    /// # Errors
    ///
    /// Returns the first repository or store error. Nothing is published when the
    /// repository fails.
    pub fn aggregate(
        &self,
        granularity: Granularity,
        window: &TimeWindow,
    ) -> Result<Vec<AggregatedStat>> {
        let buckets = window.buckets(granularity);
        let mut rows = Vec::new();

        for bucket in &buckets {
            let counts = self
                .repository
                .count_by_service_and_level(&bucket.range)
                .inspect_err(|e| {
                    warn!(
                        granularity = %granularity,
                        bucket = %bucket.start,
                        error = %e,
                        "aggregation query failed; keeping previous rollups"
                    );
                })?;

            rows.extend(counts.into_iter().filter(|c| c.count > 0).map(|c| {
                AggregatedStat {
                    bucket_start: bucket.start,
                    granularity,
                    service: c.service,
                    level: c.level,
                    count: c.count,
                }
            }));
        }

        self.stats
            .replace_buckets(granularity, window, rows.clone())?;

        info!(
            granularity = %granularity,
            window = %window,
            buckets = buckets.len(),
            rows = rows.len(),
            "aggregated logs"
        );
        Ok(rows)
    }

    /// Aggregates the last complete minute before `now`.
    pub fn aggregate_minute(&self, now: DateTime<Utc>) -> Result<Vec<AggregatedStat>> {
        let end = Granularity::Minute.truncate(now);
        let window = TimeWindow::new(end - Granularity::Minute.delta(), end)?;
        self.aggregate(Granularity::Minute, &window)
    }

    /// Aggregates the previous and the current hour.
    ///
    /// The previous hour is included so its bucket is closed out with every
    /// entry that arrived after the last run.
    pub fn aggregate_hourly(&self, now: DateTime<Utc>) -> Result<Vec<AggregatedStat>> {
        self.aggregate_around(Granularity::Hour, now)
    }

    /// Aggregates the previous and the current UTC day.
    pub fn aggregate_daily(&self, now: DateTime<Utc>) -> Result<Vec<AggregatedStat>> {
        self.aggregate_around(Granularity::Day, now)
    }

    fn aggregate_around(
        &self,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> Result<Vec<AggregatedStat>> {
        let current = granularity.truncate(now);
        let window = TimeWindow::new(
            current - granularity.delta(),
            current + granularity.delta(),
        )?;
        self.aggregate(granularity, &window)
    }

    /// Drops raw entries and rollup rows older than `policy` allows as of `now`.
    ///
    /// # Errors
    ///
    /// Returns the first repository or store error; earlier steps stay applied.
    pub fn prune(&self, now: DateTime<Utc>, policy: &RetentionPolicy) -> Result<PruneReport> {
        let mut report = PruneReport::default();

        if let Some(cutoff) = RetentionPolicy::cutoff(policy.raw_logs, now) {
            report.raw_logs = self.repository.prune_before(cutoff)?;
        }
        for granularity in [Granularity::Minute, Granularity::Hour, Granularity::Day] {
            let Some(cutoff) = RetentionPolicy::cutoff(policy.for_granularity(granularity), now)
            else {
                continue;
            };
            let pruned = self.stats.prune_before(granularity, cutoff)?;
            match granularity {
                Granularity::Minute => report.minute_rows = pruned,
                Granularity::Hour => report.hourly_rows = pruned,
                Granularity::Day => report.daily_rows = pruned,
            }
        }

        if report.total() > 0 {
            info!(
                raw_logs = report.raw_logs,
                minute_rows = report.minute_rows,
                hourly_rows = report.hourly_rows,
                daily_rows = report.daily_rows,
                "applied retention"
            );
        }
        Ok(report)
    }

    /// Published rows for the window, optionally limited to one service.
    pub fn stats(
        &self,
        granularity: Granularity,
        window: &TimeWindow,
        service: Option<&str>,
    ) -> Vec<AggregatedStat> {
        self.stats.query(granularity, window, service)
    }

    /// Services with at least one entry in the window.
    pub fn services(&self, window: &TimeWindow) -> Result<Vec<String>> {
        self.repository.services(window)
    }

    /// Raw count for a service (or all services) at any of `levels`.
    pub fn count(
        &self,
        service: Option<&str>,
        levels: &[LogLevel],
        window: &TimeWindow,
    ) -> Result<u64> {
        self.repository.count(service, levels, window)
    }

    /// Per-level counts for one service.
    pub fn level_counts(&self, service: &str, window: &TimeWindow) -> Result<LevelCounts> {
        self.repository.level_counts(service, window)
    }

    /// Share of a service's entries that are `Error` or `Critical`; 0 without entries.
    pub fn error_rate(&self, service: &str, window: &TimeWindow) -> Result<f64> {
        let total = self.repository.count(Some(service), &[], window)?;
        if total == 0 {
            debug!(service, "no logs in window; error rate is zero");
            return Ok(0.0);
        }
        let errors = self
            .repository
            .count(Some(service), &LogLevel::ERROR_CLASS, window)?;
        Ok(ratio(errors, total))
    }

    /// Folds rows into per-service totals.
    #[must_use]
    pub fn rollups(stats: &[AggregatedStat]) -> BTreeMap<String, ServiceRollup> {
        let mut rollups: BTreeMap<String, ServiceRollup> = BTreeMap::new();

        for stat in stats {
            let rollup = rollups
                .entry(stat.service.clone())
                .or_insert_with(|| ServiceRollup {
                    service: stat.service.clone(),
                    ..ServiceRollup::default()
                });
            rollup.total += stat.count;
            if stat.level.is_error_class() {
                rollup.error_count += stat.count;
            } else if stat.level == LogLevel::Warn {
                rollup.warning_count += stat.count;
            }
        }

        for rollup in rollups.values_mut() {
            rollup.error_rate = ratio(rollup.error_count, rollup.total);
        }
        rollups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LogError;
    use crate::store::{InMemoryLogRepository, InMemoryStatStore};
    use crate::types::{LogEntry, MessageCount, ServiceLevelCount};
    use chrono::{TimeDelta, TimeZone};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, s).unwrap()
    }

    fn entry(service: &str, level: LogLevel, ts: DateTime<Utc>) -> LogEntry {
        LogEntry::builder()
            .timestamp(ts)
            .level(level)
            .service(service)
            .message("msg")
            .build()
            .unwrap()
    }

    fn setup() -> (Arc<InMemoryLogRepository>, Arc<InMemoryStatStore>, LogAggregationService) {
        let repo = Arc::new(InMemoryLogRepository::new());
        let stats = Arc::new(InMemoryStatStore::new());
        let service = LogAggregationService::new(repo.clone(), stats.clone());
        (repo, stats, service)
    }

    /// Repository wrapper whose queries fail on demand.
    struct FlakyRepository {
        inner: InMemoryLogRepository,
        failing: AtomicBool,
    }

    impl FlakyRepository {
        fn check(&self) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(LogError::Repository("database unavailable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl LogRepository for FlakyRepository {
        fn services(&self, window: &TimeWindow) -> Result<Vec<String>> {
            self.check()?;
            self.inner.services(window)
        }

        fn count_by_service_and_level(
            &self,
            window: &TimeWindow,
        ) -> Result<Vec<ServiceLevelCount>> {
            self.check()?;
            self.inner.count_by_service_and_level(window)
        }

        fn count(
            &self,
            service: Option<&str>,
            levels: &[LogLevel],
            window: &TimeWindow,
        ) -> Result<u64> {
            self.check()?;
            self.inner.count(service, levels, window)
        }

        fn level_counts(&self, service: &str, window: &TimeWindow) -> Result<LevelCounts> {
            self.check()?;
            self.inner.level_counts(service, window)
        }

        fn top_messages(
            &self,
            service: &str,
            levels: &[LogLevel],
            window: &TimeWindow,
            limit: usize,
        ) -> Result<Vec<MessageCount>> {
            self.check()?;
            self.inner.top_messages(service, levels, window, limit)
        }

        fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
            self.check()?;
            self.inner.prune_before(cutoff)
        }
    }

    #[test]
    fn aggregate_hourly_buckets() {
        let (repo, stats, service) = setup();
        repo.append(entry("api", LogLevel::Error, at(10, 5, 0)));
        repo.append(entry("api", LogLevel::Error, at(10, 50, 0)));
        repo.append(entry("api", LogLevel::Info, at(11, 5, 0)));
        repo.append(entry("web", LogLevel::Warn, at(11, 30, 0)));

        let window = TimeWindow::new(at(10, 0, 0), at(12, 0, 0)).unwrap();
        let rows = service.aggregate(Granularity::Hour, &window).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(stats.len(), 3);
        let api_errors = service.stats(Granularity::Hour, &window, Some("api"));
        assert!(api_errors.iter().any(|s| s.bucket_start == at(10, 0, 0)
            && s.level == LogLevel::Error
            && s.count == 2));
    }

    #[test]
    fn aggregate_failure_keeps_previous_rows() {
        let flaky = Arc::new(FlakyRepository {
            inner: InMemoryLogRepository::new(),
            failing: AtomicBool::new(false),
        });
        flaky.inner.append(entry("api", LogLevel::Error, at(10, 5, 0)));
        let stats = Arc::new(InMemoryStatStore::new());
        let service = LogAggregationService::new(flaky.clone(), stats.clone());
        let window = TimeWindow::new(at(10, 0, 0), at(11, 0, 0)).unwrap();

        service.aggregate(Granularity::Hour, &window).unwrap();
        flaky.inner.append(entry("api", LogLevel::Error, at(10, 6, 0)));
        flaky.failing.store(true, Ordering::SeqCst);

        let result = service.aggregate(Granularity::Hour, &window);
        assert!(matches!(result, Err(LogError::Repository(_))));

        let rows = service.stats(Granularity::Hour, &window, None);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count, 1);
    }

    #[test]
    fn aggregate_removes_vanished_rows() {
        let (repo, stats, service) = setup();
        repo.append(entry("api", LogLevel::Error, at(10, 5, 0)));
        let window = TimeWindow::new(at(10, 0, 0), at(11, 0, 0)).unwrap();
        service.aggregate(Granularity::Hour, &window).unwrap();

        repo.prune_before(at(11, 0, 0)).unwrap();
        service.aggregate(Granularity::Hour, &window).unwrap();
        assert!(stats.is_empty());
    }

    #[test]
    fn prune_bounds_minute_rows_over_a_day_of_cycles() {
        let (repo, stats, service) = setup();
        let policy = RetentionPolicy::default()
            .with_raw_logs(std::time::Duration::from_secs(3600))
            .with_minute(std::time::Duration::from_secs(3600));
        let start = at(0, 0, 30);

        for minute in 0..24 * 60 {
            let now = start + TimeDelta::minutes(minute);
            repo.append(entry("api", LogLevel::Error, now - TimeDelta::seconds(20)));
            service.aggregate_minute(now).unwrap();
            service.prune(now, &policy).unwrap();
        }

        let minute_rows = stats
            .snapshot()
            .values()
            .filter(|s| s.granularity == Granularity::Minute)
            .count();
        assert!(minute_rows <= 61, "kept {minute_rows} minute rows");
        assert!(repo.len() <= 61);
    }

    #[test]
    fn prune_reports_removed_rows() {
        let (repo, _stats, service) = setup();
        repo.append(entry("api", LogLevel::Error, at(10, 5, 0)));
        repo.append(entry("api", LogLevel::Info, at(11, 55, 0)));
        service.aggregate_minute(at(10, 6, 0)).unwrap();
        service.aggregate_minute(at(11, 56, 0)).unwrap();

        let policy = RetentionPolicy::default()
            .with_raw_logs(std::time::Duration::from_secs(3600))
            .with_minute(std::time::Duration::from_secs(3600));
        let report = service.prune(at(12, 0, 0), &policy).unwrap();

        assert_eq!(report.raw_logs, 1);
        assert_eq!(report.minute_rows, 1);
        assert_eq!(report.hourly_rows, 0);
        assert_eq!(report.total(), 2);
    }

    #[test]
    fn aggregate_minute_covers_last_complete_minute() {
        let (repo, _, service) = setup();
        repo.append(entry("api", LogLevel::Error, at(10, 4, 30)));
        repo.append(entry("api", LogLevel::Error, at(10, 5, 10)));

        let rows = service.aggregate_minute(at(10, 5, 20)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bucket_start, at(10, 4, 0));
        assert_eq!(rows[0].granularity, Granularity::Minute);
    }

    #[test]
    fn aggregate_hourly_closes_previous_hour() {
        let (repo, _, service) = setup();
        repo.append(entry("api", LogLevel::Info, at(9, 59, 0)));
        repo.append(entry("api", LogLevel::Info, at(10, 1, 0)));

        let rows = service.aggregate_hourly(at(10, 2, 0)).unwrap();
        let starts: Vec<_> = rows.iter().map(|r| r.bucket_start).collect();
        assert_eq!(starts, vec![at(9, 0, 0), at(10, 0, 0)]);
    }

    #[test]
    fn aggregate_daily_uses_utc_midnight() {
        let (repo, _, service) = setup();
        repo.append(entry("api", LogLevel::Info, at(1, 0, 0)));

        let rows = service.aggregate_daily(at(23, 0, 0)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bucket_start, at(0, 0, 0));
        assert_eq!(rows[0].granularity, Granularity::Day);
    }

    #[test]
    fn error_rate_zero_without_logs() {
        let (_, _, service) = setup();
        let window = TimeWindow::new(at(10, 0, 0), at(11, 0, 0)).unwrap();
        assert!(service.error_rate("api", &window).unwrap().abs() < f64::EPSILON);
    }

    #[test]
    fn error_rate_counts_critical() {
        let (repo, _, service) = setup();
        repo.append(entry("api", LogLevel::Error, at(10, 0, 0)));
        repo.append(entry("api", LogLevel::Critical, at(10, 0, 1)));
        repo.append(entry("api", LogLevel::Info, at(10, 0, 2)));
        repo.append(entry("api", LogLevel::Info, at(10, 0, 3)));

        let window = TimeWindow::new(at(10, 0, 0), at(11, 0, 0)).unwrap();
        assert!((service.error_rate("api", &window).unwrap() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn rollups_fold_levels() {
        let (repo, _, service) = setup();
        for _ in 0..5 {
            repo.append(entry("api", LogLevel::Error, at(10, 0, 0)));
        }
        for _ in 0..15 {
            repo.append(entry("api", LogLevel::Info, at(10, 0, 0)));
        }
        repo.append(entry("api", LogLevel::Warn, at(10, 0, 0)));

        let window = TimeWindow::new(at(10, 0, 0), at(10, 1, 0)).unwrap();
        let rows = service.aggregate(Granularity::Minute, &window).unwrap();
        let rollups = LogAggregationService::rollups(&rows);
        let api = &rollups["api"];

        assert_eq!(api.total, 21);
        assert_eq!(api.error_count, 5);
        assert_eq!(api.warning_count, 1);
    }

    fn arb_entry() -> impl Strategy<Value = LogEntry> {
        (
            prop::sample::select(vec!["api", "web", "worker"]),
            prop::sample::select(LogLevel::ALL.to_vec()),
            0i64..(3 * 3_600),
        )
            .prop_map(|(service, level, offset)| {
                entry(service, level, at(9, 0, 0) + TimeDelta::seconds(offset))
            })
    }

    proptest! {
        #[test]
        fn prop_sum_over_levels_matches_raw_count(
            entries in proptest::collection::vec(arb_entry(), 0..200),
            granularity in prop::sample::select(vec![Granularity::Minute, Granularity::Hour]),
        ) {
            let (repo, _, service) = setup();
            repo.extend(entries);
            let window = TimeWindow::new(at(9, 0, 0), at(12, 0, 0)).unwrap();

            let rows = service.aggregate(granularity, &window).unwrap();

            for name in ["api", "web", "worker"] {
                let summed: u64 = rows.iter().filter(|r| r.service == name).map(|r| r.count).sum();
                let raw = repo.count(Some(name), &[], &window).unwrap();
                prop_assert_eq!(summed, raw);
            }
        }

        #[test]
        fn prop_recompute_is_idempotent(
            entries in proptest::collection::vec(arb_entry(), 0..200),
        ) {
            let (repo, stats, service) = setup();
            repo.extend(entries);
            let window = TimeWindow::new(at(9, 0, 0), at(12, 0, 0)).unwrap();

            service.aggregate(Granularity::Hour, &window).unwrap();
            let first = stats.snapshot();
            service.aggregate(Granularity::Hour, &window).unwrap();
            let second = stats.snapshot();

            prop_assert_eq!(&*first, &*second);
        }
    }
}
