//! In-process TTL cache for computed dashboard values.
//!
//! - [`StatsCache`] — Shared key/value store with per-entry expiry
//! - [`CacheStats`] — Hit, miss and eviction counters
//! - [`SweeperHandle`] — Owner of the background task that removes expired entries

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::error::{DashboardError, DashboardResult};

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reads that returned a live entry.
    pub hits: u64,
    /// Reads that found nothing or an expired entry.
    pub misses: u64,
    /// Expired entries removed by a sweep.
    pub evictions: u64,
    /// `hits / (hits + misses)`, 0 before any read.
    pub hit_rate: f64,
    /// Entries currently stored, expired or not.
    pub size: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug)]
struct Inner<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// A shared TTL cache. Cloning yields another handle to the same entries.
#[derive(Debug)]
pub struct StatsCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for StatsCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> StatsCache<V> {
    /// Create a cache whose entries live for `default_ttl` unless set otherwise.
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                default_ttl,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    /// Create a cache from configuration.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.default_ttl)
    }

    /// Default entry lifetime.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Returns the live value for `key`.
    ///
    /// An expired entry counts as a miss even if no sweep has removed it yet.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let value = self
            .inner
            .entries
            .read()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone());

        if value.is_some() {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Stores `value` under `key` with the default TTL.
    ///
    /// # Errors
    ///
    /// Returns [`DashboardError::EmptyCacheKey`] if `key` is empty.
    pub fn set(&self, key: impl Into<String>, value: V) -> DashboardResult<()> {
        self.set_with_ttl(key, value, self.inner.default_ttl)
    }

    /// Stores `value` under `key`, live for `ttl` from now.
    ///
    /// # Errors
    ///
    /// Returns [`DashboardError::EmptyCacheKey`] if `key` is empty.
    pub fn set_with_ttl(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Duration,
    ) -> DashboardResult<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(DashboardError::EmptyCacheKey);
        }
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.inner.entries.write().insert(key, entry);
        Ok(())
    }

    /// Removes `key`. Returns true if an entry was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.inner.entries.write().remove(key).is_some();
        if removed {
            debug!(key, "cache entry invalidated");
        }
        removed
    }

    /// Removes every key starting with `prefix`. Returns the number removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.inner.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(prefix, removed, "cache entries invalidated");
        }
        removed
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.inner.entries.write().clear();
    }

    /// Removes expired entries and counts them as evictions.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.inner.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let evicted = before - entries.len();
        drop(entries);

        if evicted > 0 {
            self.inner
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(evicted, "swept expired cache entries");
        }
        evicted
    }

    /// Number of stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        let requests = hits + misses;
        CacheStats {
            hits,
            misses,
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            hit_rate: if requests == 0 {
                0.0
            } else {
                hits as f64 / requests as f64
            },
            size: self.len(),
        }
    }

    /// Spawns a task that sweeps every `every` until the handle is stopped or dropped.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start_sweeper(&self, every: Duration) -> SweeperHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let cache = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            info!(interval_ms = every.as_millis() as u64, "starting cache sweeper");
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        info!("cache sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        cache.sweep();
                    }
                }
            }
        });

        SweeperHandle {
            guard: cancel.drop_guard(),
            handle,
        }
    }
}

/// Owns a running sweeper. Dropping the handle cancels the task without waiting.
#[derive(Debug)]
pub struct SweeperHandle {
    guard: DropGuard,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Cancels the sweeper and waits for it to exit.
    pub async fn stop(self) {
        let Self { guard, handle } = self;
        drop(guard);
        if let Err(e) = handle.await {
            debug!(error = %e, "cache sweeper exited abnormally");
        }
    }

    /// Returns true once the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    mod ttl_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn entry_is_hit_until_ttl_elapses() {
            let cache = StatsCache::new(Duration::from_secs(60));
            cache
                .set_with_ttl("dashboard_stats", 1_u32, Duration::from_millis(100))
                .unwrap();

            tokio::time::advance(Duration::from_millis(99)).await;
            assert_eq!(cache.get("dashboard_stats"), Some(1));

            tokio::time::advance(Duration::from_millis(2)).await;
            assert_eq!(cache.get("dashboard_stats"), None);

            // still stored until swept
            assert_eq!(cache.len(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn default_ttl_applies() {
            let cache = StatsCache::new(Duration::from_secs(300));
            cache.set("health_stats", "ok".to_string()).unwrap();

            tokio::time::advance(Duration::from_secs(299)).await;
            assert!(cache.get("health_stats").is_some());

            tokio::time::advance(Duration::from_secs(1)).await;
            assert!(cache.get("health_stats").is_none());
        }

        #[tokio::test(start_paused = true)]
        async fn overwrite_refreshes_expiry() {
            let cache = StatsCache::new(Duration::from_secs(10));
            cache.set("k", 1).unwrap();
            tokio::time::advance(Duration::from_secs(8)).await;
            cache.set("k", 2).unwrap();
            tokio::time::advance(Duration::from_secs(8)).await;
            assert_eq!(cache.get("k"), Some(2));
        }

        #[test]
        fn empty_key_rejected() {
            let cache = StatsCache::new(Duration::from_secs(10));
            assert!(matches!(
                cache.set("", 1),
                Err(DashboardError::EmptyCacheKey)
            ));
            assert!(cache.is_empty());
        }
    }

    mod invalidation_tests {
        use super::*;

        #[test]
        fn invalidate_single_key() {
            let cache = StatsCache::new(Duration::from_secs(10));
            cache.set("service_stats_api", 1).unwrap();
            assert!(cache.invalidate("service_stats_api"));
            assert!(!cache.invalidate("service_stats_api"));
            assert_eq!(cache.get("service_stats_api"), None);
        }

        #[test]
        fn invalidate_by_prefix() {
            let cache = StatsCache::new(Duration::from_secs(10));
            cache.set("service_stats_api", 1).unwrap();
            cache.set("service_stats_db", 2).unwrap();
            cache.set("dashboard_stats", 3).unwrap();

            assert_eq!(cache.invalidate_prefix("service_stats_"), 2);
            assert_eq!(cache.len(), 1);
            assert_eq!(cache.get("dashboard_stats"), Some(3));
        }

        #[test]
        fn clear_removes_everything() {
            let cache = StatsCache::new(Duration::from_secs(10));
            cache.set("a", 1).unwrap();
            cache.set("b", 2).unwrap();
            cache.clear();
            assert!(cache.is_empty());
        }
    }

    mod stats_tests {
        use super::*;

        #[test]
        fn hit_rate_zero_without_reads() {
            let cache: StatsCache<u32> = StatsCache::new(Duration::from_secs(10));
            let stats = cache.stats();
            assert_eq!(stats.hits + stats.misses, 0);
            assert!(stats.hit_rate.abs() < f64::EPSILON);
        }

        #[test]
        fn hit_rate_counts_hits_and_misses() {
            let cache = StatsCache::new(Duration::from_secs(10));
            cache.set("k", 1).unwrap();
            for _ in 0..7 {
                assert!(cache.get("k").is_some());
            }
            for _ in 0..3 {
                assert!(cache.get("missing").is_none());
            }

            let stats = cache.stats();
            assert_eq!(stats.hits, 7);
            assert_eq!(stats.misses, 3);
            assert!((stats.hit_rate - 0.7).abs() < 1e-9);
            assert_eq!(stats.size, 1);
        }

        #[tokio::test(start_paused = true)]
        async fn sweep_counts_evictions() {
            let cache = StatsCache::new(Duration::from_secs(10));
            cache.set_with_ttl("short", 1, Duration::from_secs(1)).unwrap();
            cache.set("long", 2).unwrap();

            tokio::time::advance(Duration::from_secs(2)).await;
            assert_eq!(cache.sweep(), 1);
            assert_eq!(cache.sweep(), 0);

            let stats = cache.stats();
            assert_eq!(stats.evictions, 1);
            assert_eq!(stats.size, 1);
        }

        #[test]
        fn clones_share_entries() {
            let cache = StatsCache::new(Duration::from_secs(10));
            let other = cache.clone();
            cache.set("k", 1).unwrap();
            assert_eq!(other.get("k"), Some(1));
            assert_eq!(cache.stats().hits, 1);
        }
    }

    mod sweeper_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn sweeper_removes_expired_entries() {
            let cache = StatsCache::new(Duration::from_secs(10));
            cache.set_with_ttl("k", 1, Duration::from_millis(500)).unwrap();

            let sweeper = cache.start_sweeper(Duration::from_secs(1));
            tokio::time::sleep(Duration::from_millis(1100)).await;

            assert!(cache.is_empty());
            assert_eq!(cache.stats().evictions, 1);

            sweeper.stop().await;
        }

        #[tokio::test(start_paused = true)]
        async fn stop_joins_task() {
            let cache: StatsCache<u32> = StatsCache::new(Duration::from_secs(10));
            let sweeper = cache.start_sweeper(Duration::from_millis(10));
            tokio::time::sleep(Duration::from_millis(35)).await;
            sweeper.stop().await;

            cache.set_with_ttl("k", 1, Duration::from_millis(1)).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            // no sweeper left to remove it
            assert_eq!(cache.len(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn drop_cancels_task() {
            let cache: StatsCache<u32> = StatsCache::new(Duration::from_secs(10));
            let sweeper = cache.start_sweeper(Duration::from_millis(10));
            let SweeperHandle { guard, handle } = sweeper;
            drop(guard);
            handle.await.unwrap();
        }
    }

    proptest! {
        #[test]
        fn hit_rate_matches_counts(hits in 0usize..50, misses in 0usize..50) {
            let cache = StatsCache::new(Duration::from_secs(60));
            cache.set("k", 1).unwrap();
            for _ in 0..hits {
                cache.get("k");
            }
            for _ in 0..misses {
                cache.get("absent");
            }
            let stats = cache.stats();
            prop_assert_eq!(stats.hits, hits as u64);
            prop_assert_eq!(stats.misses, misses as u64);
            if hits + misses == 0 {
                prop_assert!(stats.hit_rate.abs() < f64::EPSILON);
            } else {
                prop_assert!((stats.hit_rate - hits as f64 / (hits + misses) as f64).abs() < 1e-9);
            }
        }
    }
}
