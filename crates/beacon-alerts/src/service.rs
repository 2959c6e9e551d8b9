//! Threshold evaluation and violation lifecycle.
//!
//! [`AlertService`] compares the most recent rollup bucket of each service
//! against its [`AlertConfig`], records violations (one per service, level and
//! bucket), and hands pending violations to the [`NotificationDispatcher`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use beacon_logs::{AggregatedStat, Granularity, LogLevel};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::NotificationDispatcher;
use crate::error::Result;
use crate::store::{AlertConfigSource, ViolationStore};
use crate::types::{AlertConfig, AlertViolation, ViolationLevel};

/// Summary of one notification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationReport {
    /// Pending violations picked up.
    pub attempted: usize,
    /// Violations delivered on every channel.
    pub delivered: usize,
    /// Violations with at least one failed channel.
    pub failed: usize,
    /// Violations whose service has no config or no channels.
    pub skipped: usize,
    /// True if the pass stopped early because of cancellation.
    pub cancelled: bool,
}

/// Per-minute counts observed for one service in its latest bucket.
#[derive(Debug, Clone, PartialEq)]
struct Observation {
    bucket_start: DateTime<Utc>,
    granularity: Granularity,
    errors: u64,
    warnings: u64,
}

impl Observation {
    fn per_minute(&self, level: ViolationLevel) -> f64 {
        let count = match level {
            ViolationLevel::Error => self.errors,
            ViolationLevel::Warning => self.warnings,
        };
        count as f64 / self.granularity.minutes() as f64
    }
}

/// Evaluates thresholds and drives notification.
#[derive(Clone)]
pub struct AlertService {
    configs: Arc<dyn AlertConfigSource>,
    violations: Arc<dyn ViolationStore>,
}

impl AlertService {
    /// Creates a service over the given stores.
    pub fn new(configs: Arc<dyn AlertConfigSource>, violations: Arc<dyn ViolationStore>) -> Self {
        Self {
            configs,
            violations,
        }
    }

    /// The config source.
    pub fn configs(&self) -> &Arc<dyn AlertConfigSource> {
        &self.configs
    }

    /// Evaluates `stats` against every enabled config and records new violations.
    ///
    /// For each service only the most recent bucket is considered; when several
    /// granularities share that bucket start the finest one wins. `Error` and
    /// `Critical` count toward the error threshold. A threshold is breached when
    /// the per-minute count is strictly greater than it. Returns only violations
    /// that were not already recorded for the same bucket.
    pub fn check_thresholds(&self, stats: &[AggregatedStat]) -> Result<Vec<AlertViolation>> {
        self.check_thresholds_at(stats, Utc::now())
    }

    /// [`check_thresholds`](Self::check_thresholds) with an explicit detection time.
    pub fn check_thresholds_at(
        &self,
        stats: &[AggregatedStat],
        now: DateTime<Utc>,
    ) -> Result<Vec<AlertViolation>> {
        let configs: HashMap<String, AlertConfig> = self
            .configs
            .list_enabled()?
            .into_iter()
            .map(|c| (c.service.clone(), c))
            .collect();

        let observations = Self::latest_observations(stats);
        let mut recorded = Vec::new();

        for (service, observed) in &observations {
            let Some(config) = configs.get(service) else {
                continue;
            };

            for level in [ViolationLevel::Error, ViolationLevel::Warning] {
                let current = observed.per_minute(level);
                let threshold = config.threshold(level);
                if current <= threshold as f64 {
                    continue;
                }

                let violation = AlertViolation::new(
                    service.clone(),
                    level,
                    current,
                    threshold,
                    observed.bucket_start,
                    now,
                );
                if let Some(stored) = self.violations.insert_if_absent(violation)? {
                    warn!(
                        service = %service,
                        level = %level,
                        current_count = current,
                        threshold,
                        bucket = %observed.bucket_start,
                        "alert threshold exceeded"
                    );
                    recorded.push(stored);
                }
            }
        }

        debug!(
            services = observations.len(),
            configs = configs.len(),
            violations = recorded.len(),
            "checked alert thresholds"
        );
        Ok(recorded)
    }

    fn latest_observations(stats: &[AggregatedStat]) -> BTreeMap<String, Observation> {
        let mut latest: BTreeMap<String, Observation> = BTreeMap::new();

        for stat in stats {
            let newer = latest.get(&stat.service).is_none_or(|o| {
                (stat.bucket_start, std::cmp::Reverse(stat.granularity))
                    > (o.bucket_start, std::cmp::Reverse(o.granularity))
            });
            if newer {
                latest.insert(
                    stat.service.clone(),
                    Observation {
                        bucket_start: stat.bucket_start,
                        granularity: stat.granularity,
                        errors: 0,
                        warnings: 0,
                    },
                );
            }
        }

        for stat in stats {
            let Some(observed) = latest.get_mut(&stat.service) else {
                continue;
            };
            if stat.bucket_start != observed.bucket_start
                || stat.granularity != observed.granularity
            {
                continue;
            }
            if stat.level.is_error_class() {
                observed.errors += stat.count;
            } else if stat.level == LogLevel::Warn {
                observed.warnings += stat.count;
            }
        }

        latest
    }

    /// Delivers every pending violation and stamps it.
    ///
    /// `notified_at` is set whatever the outcome, and any failure is recorded on
    /// the violation; failed deliveries are not retried by later passes.
    /// Violations interrupted by cancellation stay pending.
    pub async fn notify_pending(
        &self,
        dispatcher: &NotificationDispatcher,
        cancel: &CancellationToken,
    ) -> Result<NotificationReport> {
        let pending = self.violations.pending()?;
        let mut report = NotificationReport {
            attempted: pending.len(),
            ..NotificationReport::default()
        };

        for violation in pending {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let config = self
                .configs
                .get(&violation.service)?
                .filter(AlertConfig::has_channels);
            let Some(config) = config else {
                debug!(service = %violation.service, "no notification channel configured");
                self.violations.mark_notified(
                    violation.id,
                    Utc::now(),
                    Some("no notification channel configured".to_string()),
                )?;
                report.skipped += 1;
                continue;
            };

            let outcome = dispatcher.dispatch(&config, &violation, cancel).await;
            if outcome.was_cancelled() {
                report.cancelled = true;
                break;
            }

            if outcome.all_delivered() {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
            self.violations
                .mark_notified(violation.id, Utc::now(), outcome.error_summary())?;
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                delivered = report.delivered,
                failed = report.failed,
                skipped = report.skipped,
                cancelled = report.cancelled,
                "notified pending violations"
            );
        }
        Ok(report)
    }

    /// Recent violations for a service, newest first.
    pub fn violations_for(&self, service: &str, limit: usize) -> Result<Vec<AlertViolation>> {
        self.violations.for_service(service, limit)
    }

    /// Violations still waiting for notification.
    pub fn pending(&self) -> Result<Vec<AlertViolation>> {
        self.violations.pending()
    }
}
