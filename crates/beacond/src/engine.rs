//! Engine wiring.
//!
//! [`Engine`] owns the scheduler, the dashboard cache and its sweeper, and
//! registers three jobs:
//! - `aggregation`: minute and hourly rollups, retention, threshold check, notification and a
//!   health refresh
//! - `daily-rollup`: daily rollups
//! - `health-check`: refreshes the cached health report

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use beacon_alerts::{
    AlertConfigSource, AlertService, AlertViolation, HttpWebhookTransport, InMemoryAlertConfigStore,
    InMemoryViolationStore, MailTransport, NotificationDispatcher, NotificationReport,
    SmtpMailTransport, ViolationStore, WebhookTransport, parse_address,
};
use beacon_dashboard::{
    CacheStats, CachedDashboard, DashboardService, DashboardSnapshot, ErrorSummary, GlobalStats,
    HealthStatus, ServiceHealth, ServiceStats, StatsCache, SweeperHandle,
};
use beacon_logs::{
    InMemoryLogRepository, InMemoryStatStore, LogAggregationService, LogRepository, PruneReport,
    RetentionPolicy, StatStore,
};
use beacon_scheduler::{
    ExecutionStore, InMemoryExecutionStore, JobExecution, JobStatus, JobType, Scheduler,
    StopOutcome,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::Result;

/// Job that aggregates, checks thresholds and notifies.
pub const AGGREGATION_JOB: &str = "aggregation";
/// Job that recomputes daily rollups.
pub const DAILY_ROLLUP_JOB: &str = "daily-rollup";
/// Job that refreshes the health report.
pub const HEALTH_CHECK_JOB: &str = "health-check";

/// Storage and transport collaborators.
pub struct Collaborators {
    /// Raw log reads.
    pub repository: Arc<dyn LogRepository>,
    /// Published rollups.
    pub stats: Arc<dyn StatStore>,
    /// Alert configs.
    pub configs: Arc<dyn AlertConfigSource>,
    /// Recorded violations.
    pub violations: Arc<dyn ViolationStore>,
    /// Job execution history.
    pub history: Arc<dyn ExecutionStore>,
    /// Webhook delivery.
    pub webhook: Arc<dyn WebhookTransport>,
    /// Email delivery and sender, if email is enabled.
    pub mail: Option<(Arc<dyn MailTransport>, String)>,
}

/// Outcome of one aggregation cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Minute rows published.
    pub minute_rows: usize,
    /// Hourly rows published.
    pub hourly_rows: usize,
    /// Violations recorded in this cycle.
    pub violations: Vec<AlertViolation>,
    /// Notification pass summary.
    pub notifications: NotificationReport,
    /// Entries and rows dropped by retention.
    pub pruned: PruneReport,
}

/// The work behind each job, shared by the scheduled closures and manual calls.
#[derive(Clone)]
struct Pipeline {
    aggregation: LogAggregationService,
    alerts: AlertService,
    dispatcher: NotificationDispatcher,
    dashboard: CachedDashboard,
    retention: RetentionPolicy,
}

impl Pipeline {
    async fn aggregation_cycle(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        let minute = self.aggregation.aggregate_minute(now)?;
        let hourly = self.aggregation.aggregate_hourly(now)?;
        let pruned = self.aggregation.prune(now, &self.retention)?;

        let violations = self.alerts.check_thresholds_at(&minute, now)?;
        self.refresh_alerted(&violations, now);

        let notifications = self.alerts.notify_pending(&self.dispatcher, cancel).await?;
        Ok(CycleReport {
            minute_rows: minute.len(),
            hourly_rows: hourly.len(),
            violations,
            notifications,
            pruned,
        })
    }

    /// Drops cached stats of services that just breached and recomputes the health report.
    ///
    /// Other entries keep their TTL.
    fn refresh_alerted(&self, violations: &[AlertViolation], now: DateTime<Utc>) {
        if violations.is_empty() {
            return;
        }
        let services: BTreeSet<&str> = violations.iter().map(|v| v.service.as_str()).collect();
        for service in services {
            self.dashboard.invalidate_service(service);
        }
        if let Err(e) = self.dashboard.refresh_health(now) {
            warn!(error = %e, "failed to refresh health after new violations");
        }
    }

    fn daily_rollup(&self, now: DateTime<Utc>) -> Result<usize> {
        let rows = self.aggregation.aggregate_daily(now)?;
        Ok(rows.len())
    }

    fn health_check(&self, now: DateTime<Utc>) -> Result<BTreeMap<String, ServiceHealth>> {
        let report = self.dashboard.refresh_health(now)?;
        for health in report.values().filter(|h| h.status != HealthStatus::Ok) {
            warn!(
                service = %health.service,
                status = %health.status,
                errors = health.error_count,
                warnings = health.warning_count,
                "service unhealthy"
            );
        }
        Ok(report)
    }
}

/// The aggregation and alerting engine.
pub struct Engine {
    config: EngineConfig,
    pipeline: Pipeline,
    scheduler: Scheduler,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl Engine {
    /// Builds the engine over in-memory storage and the configured transports.
    ///
    /// Returns the log repository so the caller can feed it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a transport cannot be built.
    pub fn in_memory(config: EngineConfig) -> Result<(Self, Arc<InMemoryLogRepository>)> {
        config.validate()?;
        let repository = Arc::new(InMemoryLogRepository::new());
        let configs = InMemoryAlertConfigStore::with_configs(config.alerts.clone())?;

        let webhook = Arc::new(HttpWebhookTransport::new(
            config.notifications.webhook_timeout(),
        )?);
        let mail = match (&config.notifications.smtp, &config.notifications.from) {
            (Some(smtp), Some(from)) => {
                let transport: Arc<dyn MailTransport> = Arc::new(SmtpMailTransport::new(smtp)?);
                Some((transport, from.clone()))
            }
            _ => None,
        };

        let engine = Self::new(
            config,
            Collaborators {
                repository: repository.clone(),
                stats: Arc::new(InMemoryStatStore::new()),
                configs: Arc::new(configs),
                violations: Arc::new(InMemoryViolationStore::new()),
                history: Arc::new(InMemoryExecutionStore::new()),
                webhook,
                mail,
            },
        )?;
        Ok((engine, repository))
    }

    /// Builds the engine over the given collaborators and registers its jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the sender address is malformed.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let Collaborators {
            repository,
            stats,
            configs,
            violations,
            history,
            webhook,
            mail,
        } = collaborators;

        let aggregation = LogAggregationService::new(repository, stats);
        let alerts = AlertService::new(Arc::clone(&configs), violations);

        let mut dispatcher =
            NotificationDispatcher::new(webhook, config.notifications.retry.policy());
        if let Some((transport, from)) = mail {
            dispatcher = dispatcher.with_mail(transport, parse_address(&from)?);
        }

        let cache_config = config.cache.cache_config();
        let dashboard = CachedDashboard::new(
            DashboardService::new(aggregation.clone(), configs, config.health.dashboard_config()),
            StatsCache::from_config(&cache_config),
        );

        let pipeline = Pipeline {
            aggregation,
            alerts,
            dispatcher,
            dashboard,
            retention: config.retention.policy(),
        };
        let scheduler = Scheduler::new(history);
        register_jobs(&scheduler, &config, &pipeline)?;

        Ok(Self {
            config,
            pipeline,
            scheduler,
            sweeper: Mutex::new(None),
        })
    }

    /// The configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts the jobs and the cache sweeper.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is running or has been stopped.
    pub fn start(&self) -> Result<()> {
        self.scheduler.start()?;
        let sweep_every = self.config.cache.cache_config().sweep_interval;
        *self.sweeper.lock() = Some(self.pipeline.dashboard.cache().start_sweeper(sweep_every));
        info!(jobs = self.scheduler.job_types().len(), "engine started");
        Ok(())
    }

    /// Stops the jobs, waiting up to the configured grace period, and the sweeper.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not running.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let outcome = self
            .scheduler
            .stop_with_timeout(self.config.scheduler.stop_grace())
            .await?;
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
        info!(outcome = ?outcome, "engine stopped");
        Ok(outcome)
    }

    /// Returns true while the jobs are scheduled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Runs a job now and waits for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not running, the job is unknown or already in flight.
    pub async fn trigger_job(&self, job_type: &str) -> Result<JobExecution> {
        Ok(self.scheduler.trigger(&JobType::new(job_type)).await?)
    }

    /// Runs one aggregation cycle as of `now`, outside the scheduler.
    ///
    /// # Errors
    ///
    /// Returns the first aggregation or alerting error.
    pub async fn run_aggregation_cycle(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        self.pipeline.aggregation_cycle(now, cancel).await
    }

    /// Status of a job.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is unknown.
    pub fn job_status(&self, job_type: &str) -> Result<JobStatus> {
        Ok(self.scheduler.job_status(&JobType::new(job_type))?)
    }

    /// Latest executions of a job, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is unknown.
    pub fn job_history(&self, job_type: &str, limit: usize) -> Result<Vec<JobExecution>> {
        Ok(self.scheduler.job_history(&JobType::new(job_type), limit)?)
    }

    /// Global statistics over the health window.
    ///
    /// # Errors
    ///
    /// Returns an error if the statistics cannot be computed.
    pub fn global_stats(&self) -> Result<GlobalStats> {
        Ok(self.pipeline.dashboard.global_stats(self.config.health.window())?)
    }

    /// One service's statistics over the health window.
    ///
    /// # Errors
    ///
    /// Returns an error if the statistics cannot be computed.
    pub fn service_stats(&self, service: &str) -> Result<ServiceStats> {
        Ok(self
            .pipeline
            .dashboard
            .service_stats(service, self.config.health.window())?)
    }

    /// Most frequent errors over the health window.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be computed.
    pub fn top_errors(&self, limit: usize) -> Result<Vec<ErrorSummary>> {
        Ok(self
            .pipeline
            .dashboard
            .top_errors(self.config.health.window(), limit)?)
    }

    /// Health of every service.
    ///
    /// # Errors
    ///
    /// Returns an error if the services cannot be listed.
    pub fn health_status(&self) -> Result<BTreeMap<String, ServiceHealth>> {
        Ok(self.pipeline.dashboard.health_status()?)
    }

    /// Everything the dashboard page shows.
    ///
    /// # Errors
    ///
    /// Returns an error if a required part cannot be computed.
    pub fn snapshot(&self, services: &[String]) -> Result<DashboardSnapshot> {
        Ok(self.pipeline.dashboard.snapshot(
            self.config.health.window(),
            services,
            self.config.health.top_errors_limit,
        )?)
    }

    /// Cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.pipeline.dashboard.cache_stats()
    }

    /// Drops one cache entry. Returns true if it was cached.
    pub fn cache_invalidate(&self, key: &str) -> bool {
        self.pipeline.dashboard.invalidate(key)
    }

    /// Recent violations for a service, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the violation store fails.
    pub fn violations_for(&self, service: &str, limit: usize) -> Result<Vec<AlertViolation>> {
        Ok(self.pipeline.alerts.violations_for(service, limit)?)
    }
}

fn register_jobs(
    scheduler: &Scheduler,
    config: &EngineConfig,
    pipeline: &Pipeline,
) -> Result<()> {
    let p = pipeline.clone();
    scheduler.register(
        AGGREGATION_JOB,
        config.scheduler.aggregation_interval(),
        move |cancel: CancellationToken| {
            let p = p.clone();
            async move { p.aggregation_cycle(Utc::now(), &cancel).await.map(|_| ()) }
        },
    )?;

    let p = pipeline.clone();
    scheduler.register(
        DAILY_ROLLUP_JOB,
        config.scheduler.daily_interval(),
        move |_cancel| {
            let p = p.clone();
            async move { p.daily_rollup(Utc::now()).map(|_| ()) }
        },
    )?;

    let p = pipeline.clone();
    scheduler.register(
        HEALTH_CHECK_JOB,
        config.scheduler.health_check_interval(),
        move |_cancel| {
            let p = p.clone();
            async move { p.health_check(Utc::now()).map(|_| ()) }
        },
    )?;

    Ok(())
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("running", &self.is_running())
            .field("jobs", &self.scheduler.job_types())
            .finish_non_exhaustive()
    }
}
