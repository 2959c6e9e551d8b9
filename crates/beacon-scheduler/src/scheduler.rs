//! Interval scheduler.
//!
//! Each registered job gets its own ticker task. A tick that arrives while the
//! job's previous execution is still in flight is dropped and counted, never
//! queued. Executions are spawned on a shared [`TaskTracker`] so that
//! [`Scheduler::stop`] can wait for them.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SchedulerError};
use crate::history::ExecutionStore;
use crate::types::{ExecutionId, ExecutionStatus, JobExecution, JobState, JobStatus, JobType};

type JobFuture = BoxFuture<'static, std::result::Result<(), String>>;
type Handler = Arc<dyn Fn(CancellationToken) -> JobFuture + Send + Sync>;

/// Whether a stop waited for every execution or had to cancel some.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Every in-flight execution finished on its own.
    Graceful,
    /// The grace period elapsed and in-flight executions were cancelled.
    Cancelled,
}

#[derive(Debug, Default)]
struct SlotInfo {
    last_started_at: Option<DateTime<Utc>>,
    last_finished_at: Option<DateTime<Utc>>,
    next_run_at: Option<DateTime<Utc>>,
    last_status: Option<ExecutionStatus>,
    stopped: bool,
}

struct JobSlot {
    job_type: JobType,
    interval: Duration,
    handler: Handler,
    busy: AtomicBool,
    runs: AtomicU64,
    skipped_ticks: AtomicU64,
    info: Mutex<SlotInfo>,
}

impl JobSlot {
    /// Claims the slot for one execution, or returns `None` if one is in flight.
    fn try_claim(self: &Arc<Self>) -> Option<RunClaim> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunClaim(Arc::clone(self)))
    }

    fn status(&self) -> JobStatus {
        let info = self.info.lock();
        let state = if info.stopped {
            JobState::Stopped
        } else if self.busy.load(Ordering::Acquire) {
            JobState::Running
        } else {
            JobState::Idle
        };
        JobStatus {
            job_type: self.job_type.clone(),
            state,
            interval_ms: self.interval.as_millis() as u64,
            last_started_at: info.last_started_at,
            last_finished_at: info.last_finished_at,
            next_run_at: info.next_run_at,
            runs: self.runs.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            last_status: info.last_status,
        }
    }
}

/// Exclusive right to run a job; released on drop, including on panic.
struct RunClaim(Arc<JobSlot>);

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

enum Lifecycle {
    Created,
    Running {
        /// Stops the tickers.
        shutdown: CancellationToken,
        /// Handed to executions; cancelled only when a stop runs out of grace.
        executions: CancellationToken,
    },
    Stopped,
}

/// Runs registered jobs on fixed intervals.
pub struct Scheduler {
    jobs: RwLock<BTreeMap<JobType, Arc<JobSlot>>>,
    history: Arc<dyn ExecutionStore>,
    tracker: TaskTracker,
    lifecycle: Mutex<Lifecycle>,
}

impl Scheduler {
    /// Create a scheduler that records executions in `history`.
    pub fn new(history: Arc<dyn ExecutionStore>) -> Self {
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            history,
            tracker: TaskTracker::new(),
            lifecycle: Mutex::new(Lifecycle::Created),
        }
    }

    /// The execution history store.
    #[must_use]
    pub fn history(&self) -> &Arc<dyn ExecutionStore> {
        &self.history
    }

    /// Registers a job. Jobs must be registered before [`Scheduler::start`].
    ///
    /// The handler receives a token that is cancelled if a stop runs out of grace.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, the interval is zero, the name is
    /// taken, or the scheduler has already started.
    pub fn register<F, Fut, E>(
        &self,
        job_type: impl Into<JobType>,
        every: Duration,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::fmt::Display + 'static,
    {
        let job_type = job_type.into();
        if job_type.as_str().is_empty() {
            return Err(SchedulerError::InvalidJob {
                job_type: String::new(),
                reason: "job type cannot be empty".to_string(),
            });
        }
        if every.is_zero() {
            return Err(SchedulerError::InvalidJob {
                job_type: job_type.to_string(),
                reason: "interval must be positive".to_string(),
            });
        }
        if !matches!(*self.lifecycle.lock(), Lifecycle::Created) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let handler: Handler = Arc::new(move |cancel: CancellationToken| {
            handler(cancel)
                .map(|outcome| outcome.map_err(|e| e.to_string()))
                .boxed()
        });

        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job_type) {
            return Err(SchedulerError::DuplicateJob {
                job_type: job_type.to_string(),
            });
        }
        info!(job = %job_type, interval_ms = every.as_millis() as u64, "job registered");
        jobs.insert(
            job_type.clone(),
            Arc::new(JobSlot {
                job_type,
                interval: every,
                handler,
                busy: AtomicBool::new(false),
                runs: AtomicU64::new(0),
                skipped_ticks: AtomicU64::new(0),
                info: Mutex::new(SlotInfo::default()),
            }),
        );
        Ok(())
    }

    /// Starts one ticker task per job. Every job runs once immediately.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler is running or has been stopped.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Running { .. } => return Err(SchedulerError::AlreadyRunning),
            Lifecycle::Stopped => return Err(SchedulerError::Stopped),
            Lifecycle::Created => {}
        }

        let shutdown = CancellationToken::new();
        let executions = CancellationToken::new();
        let jobs = self.jobs.read();
        for slot in jobs.values() {
            self.tracker.spawn(tick_loop(
                Arc::clone(slot),
                Arc::clone(&self.history),
                self.tracker.clone(),
                shutdown.clone(),
                executions.clone(),
            ));
        }
        info!(jobs = jobs.len(), "scheduler started");

        *lifecycle = Lifecycle::Running {
            shutdown,
            executions,
        };
        Ok(())
    }

    /// Returns true between a successful start and stop.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running { .. })
    }

    /// Stops the tickers and waits for in-flight executions to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler is not running.
    pub async fn stop(&self) -> Result<()> {
        let (shutdown, _executions) = self.begin_stop()?;
        shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.finish_stop();
        info!("scheduler stopped");
        Ok(())
    }

    /// Stops the tickers and waits up to `grace` for in-flight executions.
    ///
    /// Executions still running after `grace` have their token cancelled and are
    /// then awaited.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler is not running.
    pub async fn stop_with_timeout(&self, grace: Duration) -> Result<StopOutcome> {
        let (shutdown, executions) = self.begin_stop()?;
        shutdown.cancel();
        self.tracker.close();

        let outcome = if tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_ok()
        {
            StopOutcome::Graceful
        } else {
            let err = SchedulerError::StopTimeout { grace };
            warn!(error = %err, "cancelling in-flight jobs");
            executions.cancel();
            self.tracker.wait().await;
            StopOutcome::Cancelled
        };

        self.finish_stop();
        info!(outcome = ?outcome, "scheduler stopped");
        Ok(outcome)
    }

    /// Runs a job now and waits for it to finish.
    ///
    /// The execution is spawned, so it completes even if the returned future is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler is not running, the job is unknown, or
    /// an execution of it is already in flight. A failing job is not an error
    /// here; it is reported in the returned record.
    pub async fn trigger(&self, job_type: &JobType) -> Result<JobExecution> {
        let executions = match &*self.lifecycle.lock() {
            Lifecycle::Running { executions, .. } => executions.clone(),
            Lifecycle::Created => return Err(SchedulerError::NotRunning),
            Lifecycle::Stopped => return Err(SchedulerError::Stopped),
        };

        let slot = self.slot(job_type)?;
        let claim = slot.try_claim().ok_or_else(|| SchedulerError::JobBusy {
            job_type: job_type.to_string(),
        })?;

        info!(job = %job_type, "manual trigger");
        let handle = self.tracker.spawn(execute(
            claim,
            Arc::clone(&self.history),
            executions,
            true,
        ));
        handle.await.map_err(|e| {
            error!(job = %job_type, error = %e, "triggered execution aborted");
            SchedulerError::Aborted {
                job_type: job_type.to_string(),
            }
        })
    }

    /// Point-in-time status of a job.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is unknown.
    pub fn job_status(&self, job_type: &JobType) -> Result<JobStatus> {
        Ok(self.slot(job_type)?.status())
    }

    /// Registered job types in name order.
    #[must_use]
    pub fn job_types(&self) -> Vec<JobType> {
        self.jobs.read().keys().cloned().collect()
    }

    /// Latest executions of a job, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is unknown.
    pub fn job_history(&self, job_type: &JobType, limit: usize) -> Result<Vec<JobExecution>> {
        self.slot(job_type)?;
        Ok(self.history.history(job_type, limit))
    }

    fn slot(&self, job_type: &JobType) -> Result<Arc<JobSlot>> {
        self.jobs
            .read()
            .get(job_type)
            .cloned()
            .ok_or_else(|| SchedulerError::JobNotFound {
                job_type: job_type.to_string(),
            })
    }

    fn begin_stop(&self) -> Result<(CancellationToken, CancellationToken)> {
        let mut lifecycle = self.lifecycle.lock();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running {
                shutdown,
                executions,
            } => Ok((shutdown, executions)),
            previous => {
                *lifecycle = previous;
                Err(SchedulerError::NotRunning)
            }
        }
    }

    fn finish_stop(&self) {
        for slot in self.jobs.read().values() {
            let mut info = slot.info.lock();
            info.stopped = true;
            info.next_run_at = None;
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Lifecycle::Running {
            shutdown,
            executions,
        } = &*self.lifecycle.lock()
        {
            shutdown.cancel();
            executions.cancel();
        }
    }
}

async fn tick_loop(
    slot: Arc<JobSlot>,
    history: Arc<dyn ExecutionStore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    executions: CancellationToken,
) {
    let mut ticker = interval(slot.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let step = TimeDelta::from_std(slot.interval).unwrap_or(TimeDelta::MAX);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                debug!(job = %slot.job_type, "ticker shutting down");
                break;
            }
            _ = ticker.tick() => {
                slot.info.lock().next_run_at = Utc::now().checked_add_signed(step);

                match slot.try_claim() {
                    Some(claim) => {
                        tracker.spawn(execute(
                            claim,
                            Arc::clone(&history),
                            executions.clone(),
                            false,
                        ));
                    }
                    None => {
                        slot.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                        debug!(job = %slot.job_type, "previous run still in flight; tick skipped");
                    }
                }
            }
        }
    }
}

async fn execute(
    claim: RunClaim,
    history: Arc<dyn ExecutionStore>,
    cancel: CancellationToken,
    manual: bool,
) -> JobExecution {
    let slot = Arc::clone(&claim.0);
    let started_at = Utc::now();
    let mut execution =
        JobExecution::started(ExecutionId::new(), slot.job_type.clone(), started_at, manual);

    slot.runs.fetch_add(1, Ordering::Relaxed);
    {
        let mut info = slot.info.lock();
        info.last_started_at = Some(started_at);
        info.last_status = Some(ExecutionStatus::Running);
    }
    if let Err(e) = history.start(&execution) {
        warn!(job = %slot.job_type, error = %e, "failed to record execution start");
    }
    debug!(job = %slot.job_type, execution = %execution.id, "job started");

    // the handler itself may panic before handing back a future
    let outcome = AssertUnwindSafe(futures::future::lazy(|_| (slot.handler)(cancel)).flatten())
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err("job panicked".to_string()));

    let finished_at = Utc::now();
    let error_message = outcome.err();
    match &error_message {
        None => info!(
            job = %slot.job_type,
            duration_ms = (finished_at - started_at).num_milliseconds(),
            "job succeeded"
        ),
        Some(e) => error!(job = %slot.job_type, error = %e, "job failed"),
    }

    execution = match history.complete(execution.id, finished_at, error_message.clone()) {
        Ok(stored) => stored,
        Err(e) => {
            warn!(job = %slot.job_type, error = %e, "failed to record execution result");
            execution.finish(finished_at, error_message);
            execution
        }
    };

    {
        let mut info = slot.info.lock();
        info.last_finished_at = Some(finished_at);
        info.last_status = Some(execution.status);
    }
    drop(claim);
    execution
}
