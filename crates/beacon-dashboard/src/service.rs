//! Dashboard statistics and service health.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use beacon_alerts::AlertConfigSource;
use beacon_logs::{LevelCounts, LogAggregationService, LogLevel, TimeWindow, ratio};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::config::DashboardConfig;
use crate::error::{DashboardError, DashboardResult};
use crate::types::{
    ErrorSummary, GlobalStats, HealthStatus, ServiceHealth, ServiceStats, ServiceSummary,
};

/// Converts a configured span into a window ending at `now`.
pub(crate) fn window_ending(span: Duration, now: DateTime<Utc>) -> DashboardResult<TimeWindow> {
    let span = TimeDelta::from_std(span)
        .map_err(|e| DashboardError::InvalidRequest(format!("window out of range: {e}")))?;
    Ok(TimeWindow::last(span, now)?)
}

/// Read-side statistics over the log repository.
#[derive(Clone)]
pub struct DashboardService {
    aggregation: LogAggregationService,
    configs: Arc<dyn AlertConfigSource>,
    config: DashboardConfig,
}

impl DashboardService {
    /// Create a dashboard service.
    pub fn new(
        aggregation: LogAggregationService,
        configs: Arc<dyn AlertConfigSource>,
        config: DashboardConfig,
    ) -> Self {
        Self {
            aggregation,
            configs,
            config,
        }
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// Totals across every service in the window.
    ///
    /// A service whose counts cannot be read is listed as `Unknown` and left
    /// out of the totals.
    ///
    /// # Errors
    ///
    /// Returns an error if the services in the window cannot be listed.
    pub fn global_stats(&self, window: &TimeWindow) -> DashboardResult<GlobalStats> {
        let services = self.aggregation.services(window)?;
        let mut counts = LevelCounts::new();
        let mut summaries = Vec::with_capacity(services.len());

        for service in services {
            match self.aggregation.level_counts(&service, window) {
                Ok(service_counts) => {
                    for (level, count) in service_counts.iter() {
                        counts.add(level, count);
                    }
                    let status = self.classify(
                        &service,
                        rate_per_minute(service_counts.errors(), window),
                        rate_per_minute(service_counts.warnings(), window),
                    );
                    summaries.push(ServiceSummary {
                        service,
                        status,
                        total: service_counts.total(),
                        error_count: service_counts.errors(),
                        error_rate: service_counts.error_rate(),
                    });
                }
                Err(e) => {
                    warn!(service = %service, error = %e, "failed to read service counts");
                    summaries.push(ServiceSummary {
                        service,
                        status: HealthStatus::Unknown,
                        total: 0,
                        error_count: 0,
                        error_rate: 0.0,
                    });
                }
            }
        }
        summaries.sort_by(|a, b| a.service.cmp(&b.service));

        let total = counts.total();
        let error_count = counts.errors();
        Ok(GlobalStats {
            window_start: window.start(),
            window_end: window.end(),
            counts,
            total,
            error_count,
            error_rate: ratio(error_count, total),
            services: summaries,
            generated_at: Utc::now(),
        })
    }

    /// Statistics for one service in the window.
    ///
    /// A service with no entries yields zero counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the service name is empty or its counts cannot be read.
    pub fn service_stats(
        &self,
        service: &str,
        window: &TimeWindow,
    ) -> DashboardResult<ServiceStats> {
        if service.is_empty() {
            return Err(DashboardError::InvalidRequest(
                "service name cannot be empty".to_string(),
            ));
        }

        let counts = self.aggregation.level_counts(service, window)?;
        Ok(ServiceStats {
            service: service.to_string(),
            window_start: window.start(),
            window_end: window.end(),
            total: counts.total(),
            error_count: counts.errors(),
            warning_count: counts.warnings(),
            error_rate: counts.error_rate(),
            counts,
            generated_at: Utc::now(),
        })
    }

    /// Most frequent `Error` and `Critical` messages across services.
    ///
    /// Services whose messages cannot be read are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if `limit` is zero or the services cannot be listed.
    pub fn top_errors(
        &self,
        window: &TimeWindow,
        limit: usize,
    ) -> DashboardResult<Vec<ErrorSummary>> {
        if limit == 0 {
            return Err(DashboardError::InvalidRequest(
                "limit must be positive".to_string(),
            ));
        }

        let repository = self.aggregation.repository();
        let mut errors = Vec::new();
        for service in self.aggregation.services(window)? {
            match repository.top_messages(&service, &LogLevel::ERROR_CLASS, window, limit) {
                Ok(messages) => errors.extend(messages.into_iter().map(|m| ErrorSummary {
                    service: m.service,
                    message: m.message,
                    level: m.level,
                    count: m.count,
                    last_seen: m.last_seen,
                })),
                Err(e) => {
                    warn!(service = %service, error = %e, "failed to read top messages");
                }
            }
        }

        errors.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| b.last_seen.cmp(&a.last_seen))
                .then_with(|| a.service.cmp(&b.service))
                .then_with(|| a.message.cmp(&b.message))
        });
        errors.truncate(limit);
        Ok(errors)
    }

    /// Health of every service over the configured health window ending now.
    ///
    /// # Errors
    ///
    /// Returns an error if the services cannot be listed.
    pub fn health_status(&self) -> DashboardResult<BTreeMap<String, HealthStatus>> {
        Ok(self
            .health_report_at(Utc::now())?
            .into_iter()
            .map(|(service, health)| (service, health.status))
            .collect())
    }

    /// Detailed health of every service over the health window ending at `now`.
    ///
    /// A service whose counts cannot be read is `Unknown`.
    ///
    /// # Errors
    ///
    /// Returns an error if the services cannot be listed.
    pub fn health_report_at(
        &self,
        now: DateTime<Utc>,
    ) -> DashboardResult<BTreeMap<String, ServiceHealth>> {
        let window = window_ending(self.config.health_window, now)?;
        let services = self.aggregation.services(&window)?;

        let report: BTreeMap<_, _> = services
            .into_iter()
            .map(|service| {
                let health = self.evaluate(&service, &window, now);
                (service, health)
            })
            .collect();
        debug!(services = report.len(), "computed service health");
        Ok(report)
    }

    /// Detailed health of one service over the health window ending at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the service name is empty or the window is out of range.
    pub fn service_health(
        &self,
        service: &str,
        now: DateTime<Utc>,
    ) -> DashboardResult<ServiceHealth> {
        if service.is_empty() {
            return Err(DashboardError::InvalidRequest(
                "service name cannot be empty".to_string(),
            ));
        }
        let window = window_ending(self.config.health_window, now)?;
        Ok(self.evaluate(service, &window, now))
    }

    fn evaluate(&self, service: &str, window: &TimeWindow, now: DateTime<Utc>) -> ServiceHealth {
        let counts = match self.aggregation.level_counts(service, window) {
            Ok(counts) => counts,
            Err(e) => {
                warn!(service, error = %e, "failed to read health counts");
                return ServiceHealth::unknown(service, now);
            }
        };

        let error_rate_per_min = rate_per_minute(counts.errors(), window);
        let warning_rate_per_min = rate_per_minute(counts.warnings(), window);
        ServiceHealth {
            service: service.to_string(),
            status: self.classify(service, error_rate_per_min, warning_rate_per_min),
            error_count: counts.errors(),
            warning_count: counts.warnings(),
            info_count: counts.get(LogLevel::Info),
            error_rate_per_min,
            warning_rate_per_min,
            last_checked_at: now,
        }
    }

    /// Applies the service's enabled alert config, or the defaults.
    fn classify(&self, service: &str, error_rate: f64, warning_rate: f64) -> HealthStatus {
        let (error_threshold, warning_threshold) = match self.configs.get(service) {
            Ok(Some(config)) if config.enabled => (
                config.error_threshold_per_min as f64,
                config.warning_threshold_per_min as f64,
            ),
            Ok(_) => self.default_thresholds(),
            Err(e) => {
                warn!(service, error = %e, "alert config lookup failed; using default thresholds");
                self.default_thresholds()
            }
        };

        if error_rate > error_threshold {
            HealthStatus::Error
        } else if warning_rate > warning_threshold {
            HealthStatus::Warning
        } else {
            HealthStatus::Ok
        }
    }

    const fn default_thresholds(&self) -> (f64, f64) {
        (
            self.config.default_error_threshold_per_min,
            self.config.default_warning_threshold_per_min,
        )
    }
}

fn rate_per_minute(count: u64, window: &TimeWindow) -> f64 {
    let minutes = window.minutes();
    if minutes <= 0.0 {
        0.0
    } else {
        count as f64 / minutes
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use beacon_alerts::{AlertConfig, InMemoryAlertConfigStore};
    use beacon_logs::{InMemoryStatStore, LogError};
    use chrono::TimeZone;

    use super::testing::{FlakyRepository, entry};
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn setup(configs: Vec<AlertConfig>) -> (Arc<FlakyRepository>, DashboardService) {
        let repository = Arc::new(FlakyRepository::default());
        let aggregation =
            LogAggregationService::new(repository.clone(), Arc::new(InMemoryStatStore::new()));
        let configs = InMemoryAlertConfigStore::with_configs(configs).unwrap();
        let service =
            DashboardService::new(aggregation, Arc::new(configs), DashboardConfig::default());
        (repository, service)
    }

    fn log_many(repo: &FlakyRepository, service: &str, level: LogLevel, message: &str, n: usize) {
        for i in 0..n {
            let ts = now() - TimeDelta::seconds(1 + (i as i64 % 3000));
            repo.inner.append(entry(service, level, message, ts));
        }
    }

    fn last_hour() -> TimeWindow {
        TimeWindow::last(TimeDelta::hours(1), now()).unwrap()
    }

    mod stats_tests {
        use super::*;

        #[test]
        fn service_stats_counts_levels() {
            let (repo, service) = setup(vec![]);
            log_many(&repo, "api", LogLevel::Info, "ok", 15);
            log_many(&repo, "api", LogLevel::Error, "boom", 4);
            log_many(&repo, "api", LogLevel::Critical, "down", 1);

            let stats = service.service_stats("api", &last_hour()).unwrap();
            assert_eq!(stats.total, 20);
            assert_eq!(stats.error_count, 5);
            assert_eq!(stats.count(LogLevel::Info), 15);
            assert!((stats.error_rate - 0.25).abs() < 1e-9);
        }

        #[test]
        fn window_past_min_time_is_an_error() {
            let result = window_ending(Duration::from_secs(10_000_000_000_000), now());
            assert!(matches!(
                result,
                Err(DashboardError::Logs(LogError::WindowOutOfRange { .. }))
            ));
        }

        #[test]
        fn service_stats_empty_service() {
            let (_repo, service) = setup(vec![]);
            let stats = service.service_stats("ghost", &last_hour()).unwrap();
            assert_eq!(stats.total, 0);
            assert!(stats.error_rate.abs() < f64::EPSILON);
        }

        #[test]
        fn service_stats_rejects_empty_name() {
            let (_repo, service) = setup(vec![]);
            assert!(matches!(
                service.service_stats("", &last_hour()),
                Err(DashboardError::InvalidRequest(_))
            ));
        }

        #[test]
        fn global_stats_marks_failing_service_unknown() {
            let (repo, service) = setup(vec![]);
            log_many(&repo, "api", LogLevel::Info, "ok", 10);
            log_many(&repo, "db", LogLevel::Error, "timeout", 3);
            repo.fail_service("db");

            let global = service.global_stats(&last_hour()).unwrap();
            assert_eq!(global.total, 10);
            assert_eq!(global.services.len(), 2);
            assert_eq!(global.unknown_services().collect::<Vec<_>>(), vec!["db"]);
        }

        #[test]
        fn global_stats_propagates_listing_failure() {
            let (repo, service) = setup(vec![]);
            repo.fail_listing.store(true, Ordering::SeqCst);
            assert!(matches!(
                service.global_stats(&last_hour()),
                Err(DashboardError::Logs(_))
            ));
        }
    }

    mod top_errors_tests {
        use super::*;

        #[test]
        fn sorted_by_count_and_truncated() {
            let (repo, service) = setup(vec![]);
            log_many(&repo, "api", LogLevel::Error, "timeout", 7);
            log_many(&repo, "api", LogLevel::Error, "refused", 2);
            log_many(&repo, "db", LogLevel::Critical, "disk full", 5);
            log_many(&repo, "db", LogLevel::Warn, "slow", 50);

            let top = service.top_errors(&last_hour(), 2).unwrap();
            assert_eq!(top.len(), 2);
            assert_eq!(top[0].message, "timeout");
            assert_eq!(top[0].count, 7);
            assert_eq!(top[1].message, "disk full");
            assert_eq!(top[1].level, LogLevel::Critical);
        }

        #[test]
        fn skips_failing_service() {
            let (repo, service) = setup(vec![]);
            log_many(&repo, "api", LogLevel::Error, "timeout", 1);
            log_many(&repo, "db", LogLevel::Error, "deadlock", 9);
            repo.fail_service("db");

            let top = service.top_errors(&last_hour(), 10).unwrap();
            assert_eq!(top.len(), 1);
            assert_eq!(top[0].service, "api");
        }

        #[test]
        fn unbounded_limit_returns_everything() {
            let (repo, service) = setup(vec![]);
            log_many(&repo, "api", LogLevel::Error, "timeout", 3);
            log_many(&repo, "db", LogLevel::Critical, "disk full", 1);

            let top = service.top_errors(&last_hour(), usize::MAX).unwrap();
            assert_eq!(top.len(), 2);
            assert_eq!(top[0].message, "timeout");
        }

        #[test]
        fn zero_limit_rejected() {
            let (_repo, service) = setup(vec![]);
            assert!(service.top_errors(&last_hour(), 0).is_err());
        }
    }

    mod health_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(LogLevel::Error, 51, HealthStatus::Error ; "errors above default")]
        #[test_case(LogLevel::Error, 50, HealthStatus::Ok ; "errors at default")]
        #[test_case(LogLevel::Critical, 51, HealthStatus::Error ; "critical counts as error")]
        #[test_case(LogLevel::Warn, 51, HealthStatus::Warning ; "warnings above default")]
        #[test_case(LogLevel::Warn, 50, HealthStatus::Ok ; "warnings at default")]
        #[test_case(LogLevel::Info, 500, HealthStatus::Ok ; "info never degrades")]
        fn default_threshold_boundary(level: LogLevel, count: usize, expected: HealthStatus) {
            let (repo, service) = setup(vec![]);
            log_many(&repo, "api", level, "event", count);

            let health = service.service_health("api", now()).unwrap();
            assert_eq!(health.status, expected);
        }

        #[test]
        fn default_thresholds() {
            let (repo, service) = setup(vec![]);
            // 51 errors per hour is above 50/h
            log_many(&repo, "noisy", LogLevel::Error, "boom", 51);
            log_many(&repo, "warm", LogLevel::Warn, "slow", 51);
            log_many(&repo, "calm", LogLevel::Error, "boom", 50);

            let report = service.health_report_at(now()).unwrap();
            assert_eq!(report["noisy"].status, HealthStatus::Error);
            assert_eq!(report["warm"].status, HealthStatus::Warning);
            assert_eq!(report["calm"].status, HealthStatus::Ok);
        }

        #[test]
        fn alert_config_thresholds_win() {
            // 120 errors over 60 minutes is 2 per minute
            let (repo, service) = setup(vec![AlertConfig::new("api", 1, 100)]);
            log_many(&repo, "api", LogLevel::Error, "boom", 120);

            let health = service.service_health("api", now()).unwrap();
            assert_eq!(health.status, HealthStatus::Error);
            assert_eq!(health.error_count, 120);
            assert!((health.error_rate_per_min - 2.0).abs() < 1e-9);
        }

        #[test]
        fn disabled_config_uses_defaults() {
            let (repo, service) =
                setup(vec![AlertConfig::new("api", 1, 100).with_enabled(false)]);
            log_many(&repo, "api", LogLevel::Error, "boom", 30);

            let health = service.service_health("api", now()).unwrap();
            assert_eq!(health.status, HealthStatus::Ok);
        }

        #[test]
        fn failing_service_is_unknown() {
            let (repo, service) = setup(vec![]);
            log_many(&repo, "api", LogLevel::Info, "ok", 3);
            log_many(&repo, "db", LogLevel::Info, "ok", 3);
            repo.fail_service("db");

            let statuses = service.health_report_at(now()).unwrap();
            assert_eq!(statuses["api"].status, HealthStatus::Ok);
            assert_eq!(statuses["db"].status, HealthStatus::Unknown);
            assert_eq!(statuses["api"].info_count, 3);
        }

        #[test]
        fn listing_failure_is_returned() {
            let (repo, service) = setup(vec![]);
            repo.fail_listing.store(true, Ordering::SeqCst);
            assert!(service.health_report_at(now()).is_err());
        }

        #[test]
        fn logs_outside_window_ignored() {
            let (repo, service) = setup(vec![]);
            for _ in 0..100 {
                repo.inner.append(entry(
                    "api",
                    LogLevel::Error,
                    "old",
                    now() - TimeDelta::hours(2),
                ));
            }
            let statuses = service.health_report_at(now()).unwrap();
            assert!(statuses.is_empty());

            let health = service.service_health("api", now()).unwrap();
            assert_eq!(health.status, HealthStatus::Ok);
            assert_eq!(health.error_count, 0);
        }
    }
}
