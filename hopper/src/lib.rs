//! An in-process job scheduler.
//!
//! Jobs are scheduled on a [`Scheduler`], either as ready made instances or by type, to run
//! once, at a fixed interval, on a cron schedule or on a list of dates. Due jobs compete for a
//! bounded number of concurrency slots by [`Priority`](job::Priority), failed attempts are
//! retried up to a per-job limit, and the whole state of the scheduler can be inspected at any
//! time through a [`Snapshot`](snapshot::Snapshot).
//!
//! # Example
//!
//! ```
//! # use hopper::prelude::*;
//! # use chrono::TimeDelta;
//! #[derive(Default)]
//! struct SendNewsletter;
//!
//! #[async_trait::async_trait]
//! impl Job for SendNewsletter {
//!     async fn perform(&self) -> ExecutionResult {
//!         ExecutionResult::Done
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), SchedulerError> {
//! let scheduler = Scheduler::new(
//!     SchedulerConfig::builder()
//!         .with_max_concurrent_jobs(2)
//!         .with_queue_polling_rate(TimeDelta::milliseconds(20))
//!         .build()?,
//! );
//!
//! let record = scheduler.schedule::<SendNewsletter>(
//!     ScheduleOptions::from_priority(Priority::High).with_max_retries(3),
//! )?;
//!
//! assert_eq!(scheduler.wait_job(&record).await, JobState::Success);
//! scheduler.graceful_shutdown().await?;
//! # Ok(())
//! # }
//! ```
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::Utc;
use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use config::{ConfigError, SchedulerConfig};
use job::{
    instantiator::{Instantiator, JobType},
    options::{CalendarScheduleOptions, Plan, RecurrentScheduleOptions, ScheduleOptions},
    record::JobRecord,
    ExecutionResult, FnJob, Job, JobId, JobState,
};
use queue::{ready::ReadyQueue, running::RunningSet, schedule::ScheduleQueue, JobTracker};
use retry::RetryPolicy;
use runner::JobRunner;
use snapshot::Snapshot;

pub mod backoff;
pub mod config;
pub mod job;
pub mod prelude;
mod queue;
pub mod recurrence;
mod retry;
mod runner;
pub mod snapshot;
pub mod testing;

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

/// Schedules jobs and runs them in the background.
///
/// Creating a scheduler spawns its two background loops, so it must happen within a tokio
/// runtime. Dropping the scheduler disposes it.
pub struct Scheduler {
    id: u64,
    config: SchedulerConfig,
    instantiator: Instantiator,
    schedule: Arc<ScheduleQueue>,
    ready: Arc<ReadyQueue>,
    running: Arc<RunningSet>,
    tracker: Arc<JobTracker>,
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("scheduled", &self.schedule.len())
            .field("enqueued", &self.ready.len())
            .field("running", &self.running.len())
            .field("free_slots", &self.ready.available_permits())
            .field("pending_jobs", &self.tracker.outstanding())
            .field("disposed", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let instantiator = Instantiator::new(config.dependency_provider());
        let schedule = Arc::new(ScheduleQueue::new(config.schedule_polling_rate()));
        let ready = Arc::new(ReadyQueue::new(
            config.max_concurrent_jobs(),
            config.queue_polling_rate(),
        ));
        let running = Arc::new(RunningSet::default());
        let tracker = Arc::new(JobTracker::default());
        let token = CancellationToken::new();

        let runner = Arc::new(JobRunner::new(
            instantiator.clone(),
            RetryPolicy::new(config.retry_backoff()),
            schedule.clone(),
            ready.clone(),
            running.clone(),
            tracker.clone(),
        ));

        let promotion = tokio::spawn({
            let stream = schedule.clone().due_records(token.clone());
            let ready = ready.clone();
            async move {
                tokio::pin!(stream);
                while let Some(record) = stream.next().await {
                    let job_id = record.id();
                    match record.mark_enqueued() {
                        Ok(()) => {
                            tracing::debug!(%job_id, "Job {job_id} is due");
                            ready.push(record);
                        }
                        Err(error) => {
                            tracing::debug!(%job_id, %error, "Skipping promotion of job {job_id}")
                        }
                    }
                }
                tracing::debug!("Shutting down promotion loop");
            }
        });

        let dispatch = tokio::spawn({
            let stream = ready.clone().dispatch(token.clone());
            async move {
                tokio::pin!(stream);
                while let Some((record, permit)) = stream.next().await {
                    let job_id = record.id();
                    match record.mark_running() {
                        Ok(()) => runner.spawn((record, permit)),
                        Err(error) => {
                            tracing::debug!(%job_id, %error, "Skipping dispatch of job {job_id}");
                            drop(permit);
                        }
                    }
                }
                tracing::debug!("Shutting down dispatch loop");
            }
        });

        Self {
            id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
            config,
            instantiator,
            schedule,
            ready,
            running,
            tracker,
            token,
            handles: vec![promotion, dispatch],
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Schedules a job instance. The same instance is used for every attempt.
    pub fn schedule_job<J: Job>(
        &self,
        job: J,
        options: ScheduleOptions,
    ) -> Result<Arc<JobRecord>, SchedulerError> {
        let plan = options.plan(Utc::now())?;
        self.submit(JobType::provided::<J>(), Some(Arc::new(job)), plan)
    }

    /// Schedules a job by type, built right before each attempt.
    pub fn schedule<J: Job + Default>(
        &self,
        options: ScheduleOptions,
    ) -> Result<Arc<JobRecord>, SchedulerError> {
        self.schedule_type(JobType::of::<J>(), options)
    }

    /// Schedules a job by type, resolving instances through the configured
    /// [`DependencyProvider`](job::instantiator::DependencyProvider) first.
    ///
    /// Fails with [`SchedulerError::ImpossibleInstantiation`] when no instance of the type could
    /// ever be built.
    pub fn schedule_type(
        &self,
        job_type: JobType,
        options: ScheduleOptions,
    ) -> Result<Arc<JobRecord>, SchedulerError> {
        self.ensure_instantiable(&job_type)?;
        let plan = options.plan(Utc::now())?;
        self.submit(job_type, None, plan)
    }

    /// Schedules an async closure as a job.
    pub fn schedule_fn<F, Fut>(
        &self,
        function: F,
        options: ScheduleOptions,
    ) -> Result<Arc<JobRecord>, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ExecutionResult> + Send + 'static,
    {
        self.schedule_job(FnJob::new(function), options)
    }

    pub fn schedule_recurrent<J: Job + Default>(
        &self,
        options: RecurrentScheduleOptions,
    ) -> Result<Arc<JobRecord>, SchedulerError> {
        self.schedule_recurrent_type(JobType::of::<J>(), options)
    }

    pub fn schedule_recurrent_type(
        &self,
        job_type: JobType,
        options: RecurrentScheduleOptions,
    ) -> Result<Arc<JobRecord>, SchedulerError> {
        self.ensure_instantiable(&job_type)?;
        let plan = options.plan(Utc::now())?;
        self.submit(job_type, None, plan)
    }

    pub fn schedule_recurrent_job<J: Job>(
        &self,
        job: J,
        options: RecurrentScheduleOptions,
    ) -> Result<Arc<JobRecord>, SchedulerError> {
        let plan = options.plan(Utc::now())?;
        self.submit(JobType::provided::<J>(), Some(Arc::new(job)), plan)
    }

    /// Schedules a job to run on each of the given dates.
    ///
    /// An empty list of dates, or a date in the past, is rejected with
    /// [`SchedulerError::InvalidArgument`].
    pub fn schedule_calendar<J: Job + Default>(
        &self,
        options: CalendarScheduleOptions,
    ) -> Result<Arc<JobRecord>, SchedulerError> {
        self.schedule_calendar_type(JobType::of::<J>(), options)
    }

    pub fn schedule_calendar_type(
        &self,
        job_type: JobType,
        options: CalendarScheduleOptions,
    ) -> Result<Arc<JobRecord>, SchedulerError> {
        self.ensure_instantiable(&job_type)?;
        let plan = options.plan(Utc::now())?;
        self.submit(job_type, None, plan)
    }

    pub fn schedule_calendar_job<J: Job>(
        &self,
        job: J,
        options: CalendarScheduleOptions,
    ) -> Result<Arc<JobRecord>, SchedulerError> {
        let plan = options.plan(Utc::now())?;
        self.submit(JobType::provided::<J>(), Some(Arc::new(job)), plan)
    }

    fn ensure_instantiable(&self, job_type: &JobType) -> Result<(), SchedulerError> {
        if self.instantiator.can_instantiate(job_type) {
            Ok(())
        } else {
            Err(SchedulerError::ImpossibleInstantiation {
                job_type: job_type.name(),
            })
        }
    }

    /// Records can only be acted upon through the scheduler that accepted them.
    fn ensure_owned(&self, record: &JobRecord, operation: &str) -> Result<(), SchedulerError> {
        if record.is_owned_by(self.id) {
            Ok(())
        } else {
            Err(SchedulerError::InvalidArgument(format!(
                "cannot {operation} job {}: it belongs to another scheduler",
                record.id()
            )))
        }
    }

    fn submit(
        &self,
        job_type: JobType,
        instance: Option<Arc<dyn Job>>,
        plan: Plan,
    ) -> Result<Arc<JobRecord>, SchedulerError> {
        if self.is_disposed() {
            return Err(SchedulerError::Disposed);
        }
        let record = Arc::new(
            JobRecord::new(
                job_type,
                instance,
                plan.priority.unwrap_or(job_type.priority()),
                plan.max_retries,
                plan.due_at,
                plan.recurrence,
            )
            .with_owner(self.id),
        );
        let job_id = record.id();

        if plan.due_at <= Utc::now() {
            record.mark_enqueued()?;
            self.tracker.track();
            tracing::debug!(%job_id, job_type = job_type.name(), "Job {job_id} enqueued");
            self.ready.push(record.clone());
        } else {
            record.mark_scheduled()?;
            self.tracker.track();
            tracing::debug!(
                %job_id,
                job_type = job_type.name(),
                due_at = %plan.due_at,
                "Job {job_id} scheduled for {}",
                plan.due_at
            );
            self.schedule.insert(record.clone());
        }
        Ok(record)
    }

    /// Cancels a job that has not started running yet.
    ///
    /// Only records that are [`JobState::Scheduled`] or [`JobState::Enqueued`] can be cancelled;
    /// any other state is left untouched and reported as
    /// [`SchedulerError::JobOperationNotPermitted`]. Records accepted by another scheduler are
    /// rejected with [`SchedulerError::InvalidArgument`].
    pub fn cancel_job(&self, record: &JobRecord) -> Result<(), SchedulerError> {
        self.ensure_owned(record, "cancel")?;
        record.cancel()?;
        let job_id = record.id();
        if self.schedule.remove(job_id).is_none() {
            self.ready.remove(job_id);
        }
        self.tracker.finish(record);
        tracing::debug!(%job_id, "Job {job_id} cancelled");
        Ok(())
    }

    /// Moves a [`JobState::Scheduled`] record straight to the ready queue, skipping what remains
    /// of its delay.
    ///
    /// The promotion loop may already hold the record as due. Whichever side enqueues it first
    /// pushes it, and losing that race is still a success.
    pub fn perform_now(&self, record: &Arc<JobRecord>) -> Result<(), SchedulerError> {
        const OPERATION: &str = "perform now";
        self.ensure_owned(record, OPERATION)?;
        record.ensure_scheduled(OPERATION)?;
        let job_id = record.id();
        self.schedule.remove(job_id);
        match record.mark_enqueued() {
            Ok(()) => {
                tracing::debug!(%job_id, "Job {job_id} performed now");
                self.ready.push(record.clone());
                Ok(())
            }
            Err(_) if record.state() == JobState::Enqueued => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Waits until the record is done with, or the scheduler is disposed, and returns its state.
    ///
    /// A recurring record is only done with once its recurrence is exhausted or it is cancelled.
    pub async fn wait_job(&self, record: &JobRecord) -> JobState {
        while !record.is_finished() {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(self.config.wait_polling_rate()) => {},
            }
        }
        record.state()
    }

    /// Waits until every record accepted so far is done with, or the scheduler is disposed.
    pub async fn wait_all_jobs(&self) {
        while !self.tracker.is_idle() {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(self.config.wait_polling_rate()) => {},
            }
        }
    }

    /// The number of records accepted and not yet done with.
    pub fn pending_jobs(&self) -> usize {
        self.tracker.outstanding()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(
            self.schedule.records(),
            self.ready.records(),
            self.running.records(),
        )
    }

    /// Stops promoting and dispatching jobs. Jobs already running are left to finish.
    pub fn dispose(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!("Disposing scheduler");
            self.token.cancel();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Disposes the scheduler and waits for its background loops to stop.
    pub async fn graceful_shutdown(mut self) -> Result<(), SchedulerError> {
        tracing::debug!("Shutting down scheduler");
        self.dispose();
        futures::future::join_all(std::mem::take(&mut self.handles))
            .await
            .into_iter()
            .collect::<Result<Vec<()>, _>>()
            .map_err(|error| {
                tracing::error!(?error, "Scheduler loop did not shut down cleanly: {error}");
                SchedulerError::GracefulShutdownFailed
            })?;
        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Cannot {operation} job {job_id} in state {state}")]
    JobOperationNotPermitted {
        job_id: JobId,
        state: JobState,
        operation: &'static str,
    },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("No dependency provider or default constructor for job type {job_type}")]
    ImpossibleInstantiation { job_type: &'static str },
    #[error("The scheduler has been disposed")]
    Disposed,
    #[error("Failed to gracefully shut down")]
    GracefulShutdownFailed,
    #[error("Invalid configuration")]
    Config(#[from] ConfigError),
}
