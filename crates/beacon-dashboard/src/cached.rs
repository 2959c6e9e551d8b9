//! Read-through caching in front of [`DashboardService`].
//!
//! Keys are derived from the request (window length, service, limit), so two
//! reads with the same parameters share an entry. Entries live out their TTL;
//! writers that need a read to see their change drop the affected keys
//! ([`CachedDashboard::invalidate_service`]) or re-store the health report
//! ([`CachedDashboard::refresh_health`]).

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::cache::{CacheStats, StatsCache};
use crate::error::DashboardResult;
use crate::service::{DashboardService, window_ending};
use crate::types::{DashboardSnapshot, ErrorSummary, GlobalStats, ServiceHealth, ServiceStats};

/// Prefix of global statistics keys.
pub const DASHBOARD_STATS_KEY: &str = "dashboard_stats";
/// Prefix of per-service statistics keys.
pub const SERVICE_STATS_PREFIX: &str = "service_stats_";
/// Prefix of top error keys.
pub const TOP_ERRORS_KEY: &str = "top_errors";
/// Key of the health report.
pub const HEALTH_KEY: &str = "health_stats";

/// Key for global statistics over the last `span`.
#[must_use]
pub fn global_stats_key(span: Duration) -> String {
    format!("{DASHBOARD_STATS_KEY}:{}", span.as_secs())
}

/// Key for one service's statistics over the last `span`.
#[must_use]
pub fn service_stats_key(service: &str, span: Duration) -> String {
    format!("{SERVICE_STATS_PREFIX}{service}:{}", span.as_secs())
}

/// Key for the top `limit` errors over the last `span`.
#[must_use]
pub fn top_errors_key(span: Duration, limit: usize) -> String {
    format!("{TOP_ERRORS_KEY}:{}:{limit}", span.as_secs())
}

/// A cached dashboard value.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardValue {
    /// Totals across services.
    Global(GlobalStats),
    /// One service's statistics.
    Service(ServiceStats),
    /// Most frequent errors.
    TopErrors(Vec<ErrorSummary>),
    /// Health by service.
    Health(BTreeMap<String, ServiceHealth>),
}

#[derive(Default)]
struct KeyLog {
    cached: Vec<String>,
    recomputed: Vec<String>,
}

impl KeyLog {
    fn record(&mut self, key: String, hit: bool) {
        if hit {
            self.cached.push(key);
        } else {
            self.recomputed.push(key);
        }
    }
}

/// [`DashboardService`] behind a [`StatsCache`].
#[derive(Clone)]
pub struct CachedDashboard {
    service: DashboardService,
    cache: StatsCache<DashboardValue>,
}

impl CachedDashboard {
    /// Wrap a dashboard service with a cache.
    pub fn new(service: DashboardService, cache: StatsCache<DashboardValue>) -> Self {
        Self { service, cache }
    }

    /// The uncached service.
    #[must_use]
    pub const fn service(&self) -> &DashboardService {
        &self.service
    }

    /// The underlying cache.
    #[must_use]
    pub const fn cache(&self) -> &StatsCache<DashboardValue> {
        &self.cache
    }

    /// Cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Global statistics over the last `span`.
    ///
    /// # Errors
    ///
    /// Returns an error if the statistics are not cached and cannot be computed.
    pub fn global_stats(&self, span: Duration) -> DashboardResult<GlobalStats> {
        self.global_at(span, Utc::now()).map(|(value, _)| value)
    }

    /// One service's statistics over the last `span`.
    ///
    /// # Errors
    ///
    /// Returns an error if the statistics are not cached and cannot be computed.
    pub fn service_stats(&self, service: &str, span: Duration) -> DashboardResult<ServiceStats> {
        self.service_at(service, span, Utc::now())
            .map(|(value, _)| value)
    }

    /// Most frequent errors over the last `span`.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is not cached and cannot be computed.
    pub fn top_errors(&self, span: Duration, limit: usize) -> DashboardResult<Vec<ErrorSummary>> {
        self.top_errors_at(span, limit, Utc::now())
            .map(|(value, _)| value)
    }

    /// Health of every service over the configured health window.
    ///
    /// # Errors
    ///
    /// Returns an error if the report is not cached and cannot be computed.
    pub fn health_status(&self) -> DashboardResult<BTreeMap<String, ServiceHealth>> {
        self.health_at(Utc::now()).map(|(value, _)| value)
    }

    /// Recomputes the health report and stores it, replacing any cached copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the report cannot be computed; the cached copy is kept.
    pub fn refresh_health(
        &self,
        now: DateTime<Utc>,
    ) -> DashboardResult<BTreeMap<String, ServiceHealth>> {
        let report = self.service.health_report_at(now)?;
        self.cache
            .set(HEALTH_KEY, DashboardValue::Health(report.clone()))?;
        debug!(services = report.len(), "health report refreshed");
        Ok(report)
    }

    /// Everything the dashboard page shows.
    ///
    /// Parts already cached are reused; only the missing keys are computed and
    /// stored. An empty `services` slice means every service in the global stats.
    /// A service whose statistics cannot be computed is left out.
    ///
    /// # Errors
    ///
    /// Returns an error if the global stats, top errors or health report are
    /// missing and cannot be computed.
    pub fn snapshot(
        &self,
        span: Duration,
        services: &[String],
        top_limit: usize,
    ) -> DashboardResult<DashboardSnapshot> {
        let now = Utc::now();
        let mut keys = KeyLog::default();

        let (global, hit) = self.global_at(span, now)?;
        keys.record(global_stats_key(span), hit);

        let (top_errors, hit) = self.top_errors_at(span, top_limit, now)?;
        keys.record(top_errors_key(span, top_limit), hit);

        let (health, hit) = self.health_at(now)?;
        keys.record(HEALTH_KEY.to_string(), hit);

        let wanted: Vec<String> = if services.is_empty() {
            global.services.iter().map(|s| s.service.clone()).collect()
        } else {
            services.to_vec()
        };

        let mut per_service = BTreeMap::new();
        for service in wanted {
            match self.service_at(&service, span, now) {
                Ok((stats, hit)) => {
                    keys.record(service_stats_key(&service, span), hit);
                    per_service.insert(service, stats);
                }
                Err(e) => warn!(service = %service, error = %e, "skipping service in snapshot"),
            }
        }

        debug!(
            cached = keys.cached.len(),
            recomputed = keys.recomputed.len(),
            "assembled dashboard snapshot"
        );

        Ok(DashboardSnapshot {
            global,
            health,
            top_errors,
            services: per_service,
            cached_keys: keys.cached,
            recomputed_keys: keys.recomputed,
            generated_at: now,
        })
    }

    /// Removes one key. Returns true if it was cached.
    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.invalidate(key)
    }

    /// Removes every cached entry for one service.
    pub fn invalidate_service(&self, service: &str) -> usize {
        self.cache
            .invalidate_prefix(&format!("{SERVICE_STATS_PREFIX}{service}:"))
    }

    fn global_at(
        &self,
        span: Duration,
        now: DateTime<Utc>,
    ) -> DashboardResult<(GlobalStats, bool)> {
        self.read_through(
            global_stats_key(span),
            |value| match value {
                DashboardValue::Global(v) => Some(v),
                _ => None,
            },
            DashboardValue::Global,
            || self.service.global_stats(&window_ending(span, now)?),
        )
    }

    fn service_at(
        &self,
        service: &str,
        span: Duration,
        now: DateTime<Utc>,
    ) -> DashboardResult<(ServiceStats, bool)> {
        self.read_through(
            service_stats_key(service, span),
            |value| match value {
                DashboardValue::Service(v) => Some(v),
                _ => None,
            },
            DashboardValue::Service,
            || self.service.service_stats(service, &window_ending(span, now)?),
        )
    }

    fn top_errors_at(
        &self,
        span: Duration,
        limit: usize,
        now: DateTime<Utc>,
    ) -> DashboardResult<(Vec<ErrorSummary>, bool)> {
        self.read_through(
            top_errors_key(span, limit),
            |value| match value {
                DashboardValue::TopErrors(v) => Some(v),
                _ => None,
            },
            DashboardValue::TopErrors,
            || self.service.top_errors(&window_ending(span, now)?, limit),
        )
    }

    fn health_at(
        &self,
        now: DateTime<Utc>,
    ) -> DashboardResult<(BTreeMap<String, ServiceHealth>, bool)> {
        self.read_through(
            HEALTH_KEY.to_string(),
            |value| match value {
                DashboardValue::Health(v) => Some(v),
                _ => None,
            },
            DashboardValue::Health,
            || self.service.health_report_at(now),
        )
    }

    /// Returns the cached value for `key`, or computes and stores it.
    /// The flag is true on a cache hit.
    fn read_through<T: Clone>(
        &self,
        key: String,
        unwrap: impl FnOnce(DashboardValue) -> Option<T>,
        wrap: impl FnOnce(T) -> DashboardValue,
        compute: impl FnOnce() -> DashboardResult<T>,
    ) -> DashboardResult<(T, bool)> {
        if let Some(value) = self.cache.get(&key).and_then(unwrap) {
            return Ok((value, true));
        }

        let value = compute()?;
        self.cache.set(key, wrap(value.clone()))?;
        Ok((value, false))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use beacon_alerts::InMemoryAlertConfigStore;
    use beacon_logs::{InMemoryStatStore, LogAggregationService, LogLevel};
    use chrono::TimeDelta;

    use super::*;
    use crate::config::DashboardConfig;
    use crate::service::testing::{FlakyRepository, entry};

    const HOUR: Duration = Duration::from_secs(3600);

    fn setup() -> (Arc<FlakyRepository>, CachedDashboard) {
        let repository = Arc::new(FlakyRepository::default());
        let aggregation =
            LogAggregationService::new(repository.clone(), Arc::new(InMemoryStatStore::new()));
        let service = DashboardService::new(
            aggregation,
            Arc::new(InMemoryAlertConfigStore::new()),
            DashboardConfig::default(),
        );
        let dashboard = CachedDashboard::new(service, StatsCache::new(Duration::from_secs(300)));
        (repository, dashboard)
    }

    fn log(repo: &FlakyRepository, service: &str, level: LogLevel, message: &str) {
        repo.inner.append(entry(
            service,
            level,
            message,
            Utc::now() - TimeDelta::minutes(5),
        ));
    }

    #[test]
    fn keys_are_derived_from_request() {
        assert_eq!(global_stats_key(HOUR), "dashboard_stats:3600");
        assert_eq!(service_stats_key("api", HOUR), "service_stats_api:3600");
        assert_eq!(top_errors_key(HOUR, 10), "top_errors:3600:10");
    }

    #[test]
    fn read_through_serves_cached_value() {
        let (repo, dashboard) = setup();
        log(&repo, "api", LogLevel::Error, "boom");

        let first = dashboard.service_stats("api", HOUR).unwrap();
        log(&repo, "api", LogLevel::Error, "boom");
        let second = dashboard.service_stats("api", HOUR).unwrap();

        assert_eq!(first.total, 1);
        assert_eq!(second.total, 1);
        assert_eq!(dashboard.cache_stats().hits, 1);
        assert_eq!(dashboard.cache_stats().misses, 1);
    }

    #[test]
    fn invalidate_forces_recompute() {
        let (repo, dashboard) = setup();
        log(&repo, "api", LogLevel::Info, "ok");
        assert_eq!(dashboard.global_stats(HOUR).unwrap().total, 1);

        log(&repo, "api", LogLevel::Info, "ok");
        assert!(dashboard.invalidate(&global_stats_key(HOUR)));
        assert_eq!(dashboard.global_stats(HOUR).unwrap().total, 2);
    }

    #[test]
    fn invalidate_service_leaves_other_services() {
        let (repo, dashboard) = setup();
        log(&repo, "api", LogLevel::Info, "ok");
        log(&repo, "apigw", LogLevel::Info, "ok");
        dashboard.service_stats("api", HOUR).unwrap();
        dashboard.service_stats("apigw", HOUR).unwrap();

        assert_eq!(dashboard.invalidate_service("api"), 1);
        assert_eq!(dashboard.cache().len(), 1);
    }

    #[test]
    fn snapshot_recomputes_only_missing_keys() {
        let (repo, dashboard) = setup();
        log(&repo, "api", LogLevel::Error, "boom");
        log(&repo, "db", LogLevel::Warn, "slow");

        dashboard.global_stats(HOUR).unwrap();
        dashboard.service_stats("api", HOUR).unwrap();

        let snapshot = dashboard.snapshot(HOUR, &[], 10).unwrap();
        assert_eq!(
            snapshot.cached_keys,
            vec![global_stats_key(HOUR), service_stats_key("api", HOUR)]
        );
        assert_eq!(
            snapshot.recomputed_keys,
            vec![
                top_errors_key(HOUR, 10),
                HEALTH_KEY.to_string(),
                service_stats_key("db", HOUR),
            ]
        );
        assert_eq!(snapshot.services.len(), 2);
        assert_eq!(snapshot.top_errors.len(), 1);
        assert_eq!(snapshot.health.len(), 2);

        let again = dashboard.snapshot(HOUR, &[], 10).unwrap();
        assert!(again.recomputed_keys.is_empty());
        assert_eq!(again.cached_keys.len(), 5);
    }

    #[test]
    fn snapshot_skips_failing_service() {
        let (repo, dashboard) = setup();
        log(&repo, "api", LogLevel::Info, "ok");
        log(&repo, "db", LogLevel::Info, "ok");
        repo.fail_service("db");

        let snapshot = dashboard.snapshot(HOUR, &[], 10).unwrap();
        assert!(snapshot.services.contains_key("api"));
        assert!(!snapshot.services.contains_key("db"));
        assert_eq!(
            snapshot.global.unknown_services().collect::<Vec<_>>(),
            vec!["db"]
        );
    }

    #[test]
    fn failed_compute_is_not_cached() {
        let (repo, dashboard) = setup();
        log(&repo, "api", LogLevel::Info, "ok");
        repo.fail_service("api");

        assert!(dashboard.service_stats("api", HOUR).is_err());
        assert!(dashboard.cache().is_empty());
    }

    #[test]
    fn refresh_health_replaces_entry() {
        let (repo, dashboard) = setup();
        log(&repo, "api", LogLevel::Info, "ok");
        assert_eq!(dashboard.health_status().unwrap().len(), 1);

        log(&repo, "db", LogLevel::Info, "ok");
        assert_eq!(dashboard.health_status().unwrap().len(), 1);

        let report = dashboard.refresh_health(Utc::now()).unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(dashboard.health_status().unwrap().len(), 2);
    }
}
