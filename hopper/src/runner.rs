//! Executes fired records and routes them on according to the outcome.
use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{sync::OwnedSemaphorePermit, task::JoinError};
use tracing::{instrument, Instrument};

use crate::{
    job::{instantiator::Instantiator, ErrorType, ExecutionError, ExecutionResult, Job},
    queue::{
        ready::{Fired, ReadyQueue},
        running::{RunningSet, RunningTask},
        schedule::ScheduleQueue,
        JobTracker, SharedRecord,
    },
    recurrence::RecurrencePolicy,
    retry::RetryPolicy,
};

/// A failed attempt, whatever its cause.
#[derive(Debug)]
pub(crate) struct Failure {
    error_type: ErrorType,
    message: String,
}

pub(crate) struct JobRunner {
    instantiator: Instantiator,
    retry_policy: RetryPolicy,
    schedule: Arc<ScheduleQueue>,
    ready: Arc<ReadyQueue>,
    running: Arc<RunningSet>,
    tracker: Arc<JobTracker>,
}

impl JobRunner {
    pub(crate) fn new(
        instantiator: Instantiator,
        retry_policy: RetryPolicy,
        schedule: Arc<ScheduleQueue>,
        ready: Arc<ReadyQueue>,
        running: Arc<RunningSet>,
        tracker: Arc<JobTracker>,
    ) -> Self {
        Self {
            instantiator,
            retry_policy,
            schedule,
            ready,
            running,
            tracker,
        }
    }

    /// Runs the fired record on its own task so the dispatch loop can carry on.
    pub(crate) fn spawn(self: &Arc<Self>, (record, permit): Fired) {
        let runner = self.clone();
        tokio::spawn(async move { runner.execute_job(record, permit).await });
    }

    #[instrument(skip(self, record, permit), fields(job_id, job_type))]
    pub(crate) async fn execute_job(&self, record: SharedRecord, permit: OwnedSemaphorePermit) {
        let job_id = record.id();
        let span = tracing::Span::current();
        span.record("job_id", tracing::field::display(&job_id));
        span.record("job_type", record.job_type().name());

        let task = self.running.register(record.clone());

        let job = match record.instance() {
            Some(job) => job,
            None => match self.instantiator.instantiate(record.job_type()) {
                Ok(job) => {
                    record.bind_instance(job.clone());
                    job
                }
                Err(error) => {
                    tracing::error!(
                        critical = true,
                        %job_id,
                        ?error,
                        "Job {job_id} could not be instantiated and is abandoned: {error}"
                    );
                    let _ = record
                        .mark_failed(ErrorType::Instantiation, error.to_string())
                        .inspect_err(|err| {
                            tracing::error!(?err, %job_id, "Failed to mark job {job_id} as failed: {err}")
                        });
                    drop(permit);
                    drop(task);
                    self.tracker.finish(&record);
                    return;
                }
            },
        };

        tracing::debug!(%job_id, task_id = %task.task_id(), "Executing job {job_id}");
        let result = tokio::spawn(attempt(job).in_current_span()).await;

        match result {
            Ok(Ok(ExecutionResult::Done)) => self.handle_job_complete(record, permit, task),
            Ok(Ok(ExecutionResult::Error { error })) => {
                self.handle_job_error(record, permit, task, error)
            }
            Ok(Err(timeout)) => self.handle_job_error(record, permit, task, timeout),
            Err(error) => self.handle_job_error(record, permit, task, error),
        }
    }

    fn handle_job_complete(
        &self,
        record: SharedRecord,
        permit: OwnedSemaphorePermit,
        task: RunningTask,
    ) {
        let job_id = record.id();
        tracing::debug!(%job_id, "Job complete {job_id}");
        let _ = record.mark_success().inspect_err(|err| {
            tracing::error!(?err, %job_id, "Failed to mark job {job_id} as complete: {err}")
        });
        drop(permit);
        drop(task);
        self.recur_or_finish(record);
    }

    fn handle_job_error(
        &self,
        record: SharedRecord,
        permit: OwnedSemaphorePermit,
        task: RunningTask,
        error: impl Into<Failure>,
    ) {
        let job_id = record.id();
        let error = error.into();
        let _ = record
            .mark_failed(error.error_type.clone(), error.message.clone())
            .inspect_err(|err| {
                tracing::error!(?err, %job_id, "Failed to mark job {job_id} as failed: {err}")
            });
        drop(permit);
        drop(task);

        if !self.retry_policy.should_retry(&record) {
            tracing::error!(
                %job_id,
                ?error,
                "Job {job_id} failed and exhausted its retries: error type: {}, message: {}",
                error.error_type,
                error.message
            );
            self.recur_or_finish(record);
            return;
        }

        let retry_at = self.retry_policy.retry_at(&record, Utc::now());
        tracing::warn!(
            %job_id,
            ?error,
            ?retry_at,
            "Job {job_id} failed and will be retried: error type: {}, message: {}",
            error.error_type,
            error.message
        );
        match record.mark_retry(retry_at) {
            Ok(()) if retry_at.is_some() => self.schedule.insert(record),
            Ok(()) => self.ready.push(record),
            Err(err) => {
                tracing::error!(?err, %job_id, "Failed to retry job {job_id}: {err}");
                self.tracker.finish(&record);
            }
        }
    }

    fn recur_or_finish(&self, record: SharedRecord) {
        let job_id = record.id();
        let Some(due_at) = RecurrencePolicy::next_due_time(&record) else {
            self.tracker.finish(&record);
            return;
        };
        match record.mark_recurring(due_at) {
            Ok(()) => {
                tracing::debug!(%job_id, %due_at, "Job {job_id} rescheduled for {due_at}");
                self.schedule.insert(record);
            }
            Err(err) => {
                tracing::error!(?err, %job_id, "Failed to reschedule job {job_id}: {err}");
                self.tracker.finish(&record);
            }
        }
    }
}

/// Runs the hook then the body, bounded by the job's timeout.
async fn attempt(job: Arc<dyn Job>) -> Result<ExecutionResult, Duration> {
    let body = async {
        match job.before_perform().await {
            ExecutionResult::Done => job.perform().await,
            error => error,
        }
    };
    match job.timeout() {
        Some(timeout) => tokio::time::timeout(timeout, body)
            .await
            .map_err(|_elapsed| timeout),
        None => Ok(body.await),
    }
}

impl From<JoinError> for Failure {
    fn from(value: JoinError) -> Self {
        let msg = value.to_string();
        let message = match value.try_into_panic() {
            Ok(panic) => panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or(msg),
            Err(_) => msg,
        };
        Self {
            error_type: ErrorType::Panic,
            message,
        }
    }
}

impl From<Box<dyn ExecutionError>> for Failure {
    fn from(value: Box<dyn ExecutionError>) -> Self {
        Self {
            error_type: ErrorType::Other(value.error_type().to_owned()),
            message: value.to_string(),
        }
    }
}

impl From<Duration> for Failure {
    fn from(value: Duration) -> Self {
        Self {
            error_type: ErrorType::Timeout,
            message: format!("Job failed to complete within timeout: {value:?}"),
        }
    }
}
