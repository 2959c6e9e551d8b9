//! In-memory implementations of the storage traits.
//!
//! This module provides:
//! - [`InMemoryLogRepository`] — Bounded raw log buffer implementing [`LogRepository`]
//! - [`InMemoryStatStore`] — Copy-on-write rollup table implementing [`StatStore`]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{LogError, Result};
use crate::traits::{LogRepository, StatStore};
use crate::types::{
    AggregatedStat, Granularity, LevelCounts, LogEntry, LogId, LogLevel, MessageCount,
    ServiceLevelCount, StatKey, TimeWindow,
};

/// Configuration for the in-memory log repository.
#[derive(Debug, Clone)]
pub struct LogRepositoryConfig {
    /// Maximum number of log entries to keep; the oldest are dropped first.
    pub max_entries: usize,
}

impl Default for LogRepositoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000_000,
        }
    }
}

/// Thread-safe in-memory log repository.
pub struct InMemoryLogRepository {
    config: LogRepositoryConfig,
    entries: RwLock<VecDeque<LogEntry>>,
    next_id: AtomicU64,
}

impl InMemoryLogRepository {
    /// Creates an empty repository with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(LogRepositoryConfig::default())
    }

    /// Creates an empty repository with the given configuration.
    #[must_use]
    pub fn with_config(config: LogRepositoryConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Appends an entry, assigning it an ID.
    pub fn append(&self, mut entry: LogEntry) -> LogId {
        let id = LogId(self.next_id.fetch_add(1, Ordering::Relaxed));
        entry.id = id;

        let mut entries = self.entries.write();
        entries.push_back(entry);
        while entries.len() > self.config.max_entries {
            entries.pop_front();
        }
        id
    }

    /// Appends every entry in order.
    pub fn extend(&self, entries: impl IntoIterator<Item = LogEntry>) -> usize {
        entries.into_iter().map(|e| self.append(e)).count()
    }

    /// Loads newline-delimited JSON entries. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error on the first unreadable or malformed line; entries
    /// before it stay loaded.
    pub fn load_jsonl<R: BufRead>(&self, reader: R) -> Result<usize> {
        let mut loaded = 0;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: LogEntry = serde_json::from_str(&line)?;
            self.append(entry);
            loaded += 1;
        }
        debug!(loaded, "loaded log entries");
        Ok(loaded)
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the repository is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn matching<'a>(
        entries: &'a VecDeque<LogEntry>,
        service: Option<&'a str>,
        levels: &'a [LogLevel],
        window: &'a TimeWindow,
    ) -> impl Iterator<Item = &'a LogEntry> + 'a {
        entries.iter().filter(move |e| {
            window.contains(e.timestamp)
                && service.is_none_or(|s| e.service == s)
                && (levels.is_empty() || levels.contains(&e.level))
        })
    }
}

impl Default for InMemoryLogRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl LogRepository for InMemoryLogRepository {
    fn services(&self, window: &TimeWindow) -> Result<Vec<String>> {
        let entries = self.entries.read();
        let services: HashSet<&str> = Self::matching(&entries, None, &[], window)
            .map(|e| e.service.as_str())
            .collect();
        let mut services: Vec<String> = services.into_iter().map(str::to_string).collect();
        services.sort();
        Ok(services)
    }

    fn count_by_service_and_level(&self, window: &TimeWindow) -> Result<Vec<ServiceLevelCount>> {
        let entries = self.entries.read();
        let mut counts: BTreeMap<(&str, LogLevel), u64> = BTreeMap::new();
        for entry in Self::matching(&entries, None, &[], window) {
            *counts.entry((entry.service.as_str(), entry.level)).or_insert(0) += 1;
        }
        Ok(counts
            .into_iter()
            .map(|((service, level), count)| ServiceLevelCount {
                service: service.to_string(),
                level,
                count,
            })
            .collect())
    }

    fn count(
        &self,
        service: Option<&str>,
        levels: &[LogLevel],
        window: &TimeWindow,
    ) -> Result<u64> {
        let entries = self.entries.read();
        Ok(Self::matching(&entries, service, levels, window).count() as u64)
    }

    fn level_counts(&self, service: &str, window: &TimeWindow) -> Result<LevelCounts> {
        let entries = self.entries.read();
        Ok(Self::matching(&entries, Some(service), &[], window)
            .map(|e| (e.level, 1))
            .collect())
    }

    fn top_messages(
        &self,
        service: &str,
        levels: &[LogLevel],
        window: &TimeWindow,
        limit: usize,
    ) -> Result<Vec<MessageCount>> {
        let entries = self.entries.read();
        let mut grouped: HashMap<&str, MessageCount> = HashMap::new();

        for entry in Self::matching(&entries, Some(service), levels, window) {
            grouped
                .entry(entry.message.as_str())
                .and_modify(|m| {
                    m.count += 1;
                    m.level = m.level.max(entry.level);
                    m.last_seen = m.last_seen.max(entry.timestamp);
                })
                .or_insert_with(|| MessageCount {
                    service: entry.service.clone(),
                    message: entry.message.clone(),
                    level: entry.level,
                    count: 1,
                    last_seen: entry.timestamp,
                });
        }

        let mut top: Vec<MessageCount> = grouped.into_values().collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.message.cmp(&b.message)));
        top.truncate(limit);
        Ok(top)
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        let pruned = before - entries.len();
        if pruned > 0 {
            debug!(pruned, cutoff = %cutoff, "pruned raw log entries");
        }
        Ok(pruned)
    }
}

/// In-memory rollup table.
///
/// Rows live in an immutable map behind an [`Arc`]. A publish builds the next
/// map off to the side and swaps the pointer, so readers never see a bucket set
/// half replaced and never wait on a recompute.
pub struct InMemoryStatStore {
    rows: RwLock<Arc<BTreeMap<StatKey, AggregatedStat>>>,
    publish: Mutex<()>,
}

impl InMemoryStatStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Arc::new(BTreeMap::new())),
            publish: Mutex::new(()),
        }
    }

    /// Current snapshot of every row.
    pub fn snapshot(&self) -> Arc<BTreeMap<StatKey, AggregatedStat>> {
        Arc::clone(&self.rows.read())
    }
}

impl Default for InMemoryStatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatStore for InMemoryStatStore {
    fn replace_buckets(
        &self,
        granularity: Granularity,
        window: &TimeWindow,
        stats: Vec<AggregatedStat>,
    ) -> Result<()> {
        let first_bucket = granularity.truncate(window.start());
        let in_range = |start: DateTime<Utc>| start >= first_bucket && start < window.end();

        if let Some(stray) = stats
            .iter()
            .find(|s| s.granularity != granularity || !in_range(s.bucket_start))
        {
            warn!(
                granularity = %granularity,
                bucket = %stray.bucket_start,
                "rejected rollup outside of replaced range"
            );
            return Err(LogError::StatStore(format!(
                "row {} {} {} does not belong to {granularity} buckets of {window}",
                stray.bucket_start, stray.service, stray.level
            )));
        }

        let _publishing = self.publish.lock();
        let current = self.snapshot();

        let mut next: BTreeMap<StatKey, AggregatedStat> = current
            .iter()
            .filter(|(k, _)| k.granularity != granularity || !in_range(k.bucket_start))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let replaced = current.len() - next.len();

        for stat in stats.into_iter().filter(|s| s.count > 0) {
            next.insert(stat.key(), stat);
        }

        debug!(
            granularity = %granularity,
            replaced,
            rows = next.len(),
            "published rollup buckets"
        );
        *self.rows.write() = Arc::new(next);
        Ok(())
    }

    fn prune_before(&self, granularity: Granularity, cutoff: DateTime<Utc>) -> Result<usize> {
        let _publishing = self.publish.lock();
        let current = self.snapshot();

        let next: BTreeMap<StatKey, AggregatedStat> = current
            .iter()
            .filter(|(k, _)| k.granularity != granularity || k.bucket_start >= cutoff)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let pruned = current.len() - next.len();
        if pruned == 0 {
            return Ok(0);
        }

        debug!(granularity = %granularity, pruned, rows = next.len(), "pruned rollup rows");
        *self.rows.write() = Arc::new(next);
        Ok(pruned)
    }

    fn query(
        &self,
        granularity: Granularity,
        window: &TimeWindow,
        service: Option<&str>,
    ) -> Vec<AggregatedStat> {
        self.snapshot()
            .values()
            .filter(|s| {
                s.granularity == granularity
                    && window.contains(s.bucket_start)
                    && service.is_none_or(|name| s.service == name)
            })
            .cloned()
            .collect()
    }

    fn len(&self) -> usize {
        self.rows.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, s).unwrap()
    }

    fn entry(service: &str, level: LogLevel, ts: DateTime<Utc>, message: &str) -> LogEntry {
        LogEntry::builder()
            .timestamp(ts)
            .level(level)
            .service(service)
            .message(message)
            .build()
            .unwrap()
    }

    fn window(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeWindow {
        TimeWindow::new(start, end).unwrap()
    }

    mod repository_tests {
        use super::*;

        #[test]
        fn append_assigns_sequential_ids() {
            let repo = InMemoryLogRepository::new();
            let a = repo.append(entry("api", LogLevel::Info, at(10, 0, 0), "a"));
            let b = repo.append(entry("api", LogLevel::Info, at(10, 0, 1), "b"));
            assert_eq!(a, LogId(1));
            assert_eq!(b, LogId(2));
            assert_eq!(repo.len(), 2);
        }

        #[test]
        fn capacity_drops_oldest() {
            let repo = InMemoryLogRepository::with_config(LogRepositoryConfig { max_entries: 2 });
            repo.append(entry("api", LogLevel::Info, at(10, 0, 0), "a"));
            repo.append(entry("api", LogLevel::Info, at(10, 0, 1), "b"));
            repo.append(entry("api", LogLevel::Info, at(10, 0, 2), "c"));

            let w = window(at(9, 0, 0), at(11, 0, 0));
            let top = repo.top_messages("api", &[], &w, 10).unwrap();
            assert_eq!(top.len(), 2);
            assert!(top.iter().all(|m| m.message != "a"));
        }

        #[test]
        fn counts_respect_half_open_window() {
            let repo = InMemoryLogRepository::new();
            repo.append(entry("api", LogLevel::Error, at(10, 0, 0), "boom"));
            repo.append(entry("api", LogLevel::Error, at(11, 0, 0), "boom"));

            let w = window(at(10, 0, 0), at(11, 0, 0));
            assert_eq!(repo.count(Some("api"), &[LogLevel::Error], &w).unwrap(), 1);
        }

        #[test]
        fn count_by_service_and_level_groups() {
            let repo = InMemoryLogRepository::new();
            repo.append(entry("api", LogLevel::Error, at(10, 0, 0), "x"));
            repo.append(entry("api", LogLevel::Error, at(10, 1, 0), "y"));
            repo.append(entry("api", LogLevel::Info, at(10, 2, 0), "z"));
            repo.append(entry("web", LogLevel::Warn, at(10, 3, 0), "w"));

            let rows = repo
                .count_by_service_and_level(&window(at(10, 0, 0), at(11, 0, 0)))
                .unwrap();
            assert_eq!(rows.len(), 3);
            assert!(rows.contains(&ServiceLevelCount {
                service: "api".to_string(),
                level: LogLevel::Error,
                count: 2,
            }));
        }

        #[test]
        fn services_sorted_and_unique() {
            let repo = InMemoryLogRepository::new();
            repo.append(entry("web", LogLevel::Info, at(10, 0, 0), "x"));
            repo.append(entry("api", LogLevel::Info, at(10, 0, 0), "x"));
            repo.append(entry("api", LogLevel::Info, at(10, 0, 0), "x"));

            let services = repo.services(&window(at(9, 0, 0), at(11, 0, 0))).unwrap();
            assert_eq!(services, vec!["api".to_string(), "web".to_string()]);
        }

        #[test]
        fn top_messages_ranked_by_count() {
            let repo = InMemoryLogRepository::new();
            for _ in 0..3 {
                repo.append(entry("api", LogLevel::Error, at(10, 0, 0), "timeout"));
            }
            repo.append(entry("api", LogLevel::Critical, at(10, 5, 0), "timeout"));
            repo.append(entry("api", LogLevel::Error, at(10, 0, 0), "refused"));
            repo.append(entry("api", LogLevel::Info, at(10, 0, 0), "healthy"));

            let top = repo
                .top_messages(
                    "api",
                    &LogLevel::ERROR_CLASS,
                    &window(at(10, 0, 0), at(11, 0, 0)),
                    1,
                )
                .unwrap();

            assert_eq!(top.len(), 1);
            assert_eq!(top[0].message, "timeout");
            assert_eq!(top[0].count, 4);
            assert_eq!(top[0].level, LogLevel::Critical);
            assert_eq!(top[0].last_seen, at(10, 5, 0));
        }

        #[test]
        fn load_jsonl_skips_blank_lines() {
            let repo = InMemoryLogRepository::new();
            let data = concat!(
                r#"{"timestamp":"2024-03-10T10:00:00Z","level":"error","#,
                r#""service":"api","message":"x"}"#,
                "\n\n",
                r#"{"timestamp":"2024-03-10T10:00:01Z","level":"INFO","#,
                r#""service":"api","message":"y"}"#,
                "\n"
            );
            let loaded = repo.load_jsonl(data.as_bytes()).unwrap();
            assert_eq!(loaded, 2);
            assert_eq!(repo.len(), 2);
        }

        #[test]
        fn load_jsonl_rejects_malformed_line() {
            let repo = InMemoryLogRepository::new();
            let result = repo.load_jsonl("not json\n".as_bytes());
            assert!(matches!(result, Err(LogError::Serialization(_))));
        }

        #[test]
        fn prune_before_removes_old_entries() {
            let repo = InMemoryLogRepository::new();
            repo.append(entry("api", LogLevel::Info, at(8, 0, 0), "old"));
            repo.append(entry("api", LogLevel::Info, at(10, 0, 0), "new"));
            assert_eq!(repo.prune_before(at(9, 0, 0)).unwrap(), 1);
            assert_eq!(repo.len(), 1);
        }
    }

    mod stat_store_tests {
        use super::*;

        fn stat(
            bucket: DateTime<Utc>,
            service: &str,
            level: LogLevel,
            count: u64,
        ) -> AggregatedStat {
            AggregatedStat {
                bucket_start: bucket,
                granularity: Granularity::Hour,
                service: service.to_string(),
                level,
                count,
            }
        }

        #[test]
        fn replace_swaps_whole_bucket() {
            let store = InMemoryStatStore::new();
            let w = window(at(10, 0, 0), at(11, 0, 0));

            store
                .replace_buckets(
                    Granularity::Hour,
                    &w,
                    vec![
                        stat(at(10, 0, 0), "api", LogLevel::Error, 4),
                        stat(at(10, 0, 0), "web", LogLevel::Info, 9),
                    ],
                )
                .unwrap();
            assert_eq!(store.len(), 2);

            store
                .replace_buckets(
                    Granularity::Hour,
                    &w,
                    vec![stat(at(10, 0, 0), "api", LogLevel::Error, 5)],
                )
                .unwrap();

            let rows = store.query(Granularity::Hour, &w, None);
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].count, 5);
        }

        #[test]
        fn replace_leaves_other_buckets_alone() {
            let store = InMemoryStatStore::new();
            store
                .replace_buckets(
                    Granularity::Hour,
                    &window(at(9, 0, 0), at(10, 0, 0)),
                    vec![stat(at(9, 0, 0), "api", LogLevel::Info, 1)],
                )
                .unwrap();
            store
                .replace_buckets(
                    Granularity::Hour,
                    &window(at(10, 0, 0), at(11, 0, 0)),
                    vec![stat(at(10, 0, 0), "api", LogLevel::Info, 2)],
                )
                .unwrap();

            assert_eq!(store.len(), 2);
        }

        #[test]
        fn replace_rejects_stray_rows_without_touching_store() {
            let store = InMemoryStatStore::new();
            let w = window(at(10, 0, 0), at(11, 0, 0));
            store
                .replace_buckets(
                    Granularity::Hour,
                    &w,
                    vec![stat(at(10, 0, 0), "api", LogLevel::Info, 1)],
                )
                .unwrap();

            let result = store.replace_buckets(
                Granularity::Hour,
                &w,
                vec![stat(at(12, 0, 0), "api", LogLevel::Info, 7)],
            );

            assert!(matches!(result, Err(LogError::StatStore(_))));
            let rows = store.query(Granularity::Hour, &w, None);
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].count, 1);
        }

        #[test]
        fn prune_drops_old_rows_of_one_granularity() {
            let store = InMemoryStatStore::new();
            for hour in 8..11 {
                store
                    .replace_buckets(
                        Granularity::Hour,
                        &window(at(hour, 0, 0), at(hour + 1, 0, 0)),
                        vec![stat(at(hour, 0, 0), "api", LogLevel::Info, 1)],
                    )
                    .unwrap();
            }
            let day = AggregatedStat {
                granularity: Granularity::Day,
                ..stat(at(0, 0, 0), "api", LogLevel::Info, 3)
            };
            store
                .replace_buckets(Granularity::Day, &window(at(0, 0, 0), at(11, 0, 0)), vec![day])
                .unwrap();

            assert_eq!(store.prune_before(Granularity::Hour, at(10, 0, 0)).unwrap(), 2);
            assert_eq!(store.len(), 2);
            assert_eq!(store.prune_before(Granularity::Hour, at(10, 0, 0)).unwrap(), 0);

            let hours = store.query(Granularity::Hour, &window(at(0, 0, 0), at(12, 0, 0)), None);
            assert_eq!(hours.len(), 1);
            assert_eq!(hours[0].bucket_start, at(10, 0, 0));
        }

        #[test]
        fn zero_counts_not_materialised() {
            let store = InMemoryStatStore::new();
            store
                .replace_buckets(
                    Granularity::Hour,
                    &window(at(10, 0, 0), at(11, 0, 0)),
                    vec![stat(at(10, 0, 0), "api", LogLevel::Info, 0)],
                )
                .unwrap();
            assert!(store.is_empty());
        }

        #[test]
        fn query_filters_service() {
            let store = InMemoryStatStore::new();
            let w = window(at(10, 0, 0), at(11, 0, 0));
            store
                .replace_buckets(
                    Granularity::Hour,
                    &w,
                    vec![
                        stat(at(10, 0, 0), "api", LogLevel::Info, 1),
                        stat(at(10, 0, 0), "web", LogLevel::Info, 1),
                    ],
                )
                .unwrap();

            let rows = store.query(Granularity::Hour, &w, Some("web"));
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].service, "web");
        }

        #[test]
        fn old_snapshot_survives_publish() {
            let store = InMemoryStatStore::new();
            let w = window(at(10, 0, 0), at(11, 0, 0));
            store
                .replace_buckets(
                    Granularity::Hour,
                    &w,
                    vec![stat(at(10, 0, 0), "api", LogLevel::Info, 1)],
                )
                .unwrap();

            let before = store.snapshot();
            store
                .replace_buckets(
                    Granularity::Hour,
                    &w,
                    vec![stat(at(10, 0, 0), "api", LogLevel::Info, 2)],
                )
                .unwrap();

            assert_eq!(before.values().next().map(|s| s.count), Some(1));
            assert_eq!(store.snapshot().values().next().map(|s| s.count), Some(2));
        }
    }
}
