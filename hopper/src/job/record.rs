//! The [`JobRecord`] tracked by the scheduler for every scheduled job.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::{recurrence::Recurrence, SchedulerError};

use super::{instantiator::JobType, ErrorType, Job, JobError, JobId, JobState, MaxRetries, Priority};

/// A scheduled job and its lifecycle.
///
/// Records are returned by the `schedule*` methods of [`crate::Scheduler`] and can be used to
/// observe a job, [cancel](crate::Scheduler::cancel_job) it,
/// [run it early](crate::Scheduler::perform_now) or [wait](crate::Scheduler::wait_job) for it.
pub struct JobRecord {
    id: JobId,
    job_type: JobType,
    priority: Priority,
    max_retries: MaxRetries,
    instance_supplied: bool,
    owner: Option<u64>,
    inner: Mutex<RecordState>,
}

struct RecordState {
    state: JobState,
    retry_count: u32,
    due_at: DateTime<Utc>,
    retry_at: Option<DateTime<Utc>>,
    instance: Option<Arc<dyn Job>>,
    recurrence: Recurrence,
    errors: Vec<JobError>,
    finished: bool,
}

impl std::fmt::Debug for JobRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("JobRecord")
            .field("id", &self.id)
            .field("job_type", &self.job_type.name())
            .field("priority", &self.priority)
            .field("max_retries", &self.max_retries)
            .field("state", &inner.state)
            .field("retry_count", &inner.retry_count)
            .field("due_at", &inner.due_at)
            .finish()
    }
}

impl JobRecord {
    pub(crate) fn new(
        job_type: JobType,
        instance: Option<Arc<dyn Job>>,
        priority: Priority,
        max_retries: MaxRetries,
        due_at: DateTime<Utc>,
        recurrence: Recurrence,
    ) -> Self {
        Self {
            id: JobId::next(),
            job_type,
            priority,
            max_retries,
            instance_supplied: instance.is_some(),
            owner: None,
            inner: Mutex::new(RecordState {
                state: JobState::NotStarted,
                retry_count: 0,
                due_at,
                retry_at: None,
                instance,
                recurrence,
                errors: Vec::new(),
                finished: false,
            }),
        }
    }

    /// Ties the record to the scheduler that accepted it.
    pub(crate) fn with_owner(mut self, owner: u64) -> Self {
        self.owner = Some(owner);
        self
    }

    pub(crate) fn is_owned_by(&self, owner: u64) -> bool {
        self.owner == Some(owner)
    }

    // Critical sections never call into job code so a poisoned lock still holds a valid state.
    fn lock(&self) -> MutexGuard<'_, RecordState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn job_type(&self) -> &JobType {
        &self.job_type
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn max_retries(&self) -> MaxRetries {
        self.max_retries
    }

    pub fn state(&self) -> JobState {
        self.lock().state
    }

    pub fn retry_count(&self) -> u32 {
        self.lock().retry_count
    }

    /// The due time of the current occurrence.
    pub fn due_at(&self) -> DateTime<Utc> {
        self.lock().due_at
    }

    /// When the record next becomes ready: the pending retry time if it is waiting on a
    /// backoff, its due time otherwise.
    pub fn next_due_at(&self) -> DateTime<Utc> {
        let inner = self.lock();
        inner.retry_at.unwrap_or(inner.due_at)
    }

    /// Every failed attempt so far, oldest first.
    pub fn errors(&self) -> Vec<JobError> {
        self.lock().errors.clone()
    }

    pub fn is_cancellable(&self) -> bool {
        self.state().is_cancellable()
    }

    pub fn is_stopped(&self) -> bool {
        self.state().is_stopped()
    }

    /// Whether the scheduler is done with this record: it will not run again.
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    pub(crate) fn instance(&self) -> Option<Arc<dyn Job>> {
        self.lock().instance.clone()
    }

    pub(crate) fn bind_instance(&self, instance: Arc<dyn Job>) {
        self.lock().instance = Some(instance);
    }

    fn transition(
        &self,
        inner: &mut RecordState,
        operation: &'static str,
        to: JobState,
    ) -> Result<(), SchedulerError> {
        if inner.state.can_transition_to(to) {
            inner.state = to;
            Ok(())
        } else {
            Err(SchedulerError::JobOperationNotPermitted {
                job_id: self.id,
                state: inner.state,
                operation,
            })
        }
    }

    pub(crate) fn mark_scheduled(&self) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        self.transition(&mut inner, "schedule", JobState::Scheduled)
    }

    pub(crate) fn mark_enqueued(&self) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        self.transition(&mut inner, "enqueue", JobState::Enqueued)
    }

    /// Only a scheduled record can be moved to the ready queue ahead of its due time.
    pub(crate) fn ensure_scheduled(&self, operation: &'static str) -> Result<(), SchedulerError> {
        let inner = self.lock();
        match inner.state {
            JobState::Scheduled => Ok(()),
            state => Err(SchedulerError::JobOperationNotPermitted {
                job_id: self.id,
                state,
                operation,
            }),
        }
    }

    pub(crate) fn mark_running(&self) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        self.transition(&mut inner, "run", JobState::Running)?;
        inner.retry_at = None;
        Ok(())
    }

    pub(crate) fn mark_success(&self) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        self.transition(&mut inner, "complete", JobState::Success)
    }

    pub(crate) fn mark_failed(
        &self,
        error_type: ErrorType,
        details: String,
    ) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        self.transition(&mut inner, "fail", JobState::Failed)?;
        let attempt = inner.retry_count + 1;
        inner.errors.push(JobError {
            attempt,
            error_type,
            details,
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    /// Consumes a retry attempt. With a `retry_at` the record waits in the schedule queue,
    /// otherwise it goes straight back to the ready queue.
    pub(crate) fn mark_retry(
        &self,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        let to = match retry_at {
            Some(_) => JobState::Scheduled,
            None => JobState::Enqueued,
        };
        self.transition(&mut inner, "retry", to)?;
        inner.retry_count += 1;
        inner.retry_at = retry_at;
        if !self.instance_supplied {
            inner.instance = None;
        }
        Ok(())
    }

    /// Advances the recurrence from the current due time.
    pub(crate) fn advance_recurrence(&self) -> Option<DateTime<Utc>> {
        let mut inner = self.lock();
        let previous = inner.due_at;
        inner.recurrence.next_due_time(previous)
    }

    /// Recycles a completed record for its next occurrence.
    pub(crate) fn mark_recurring(&self, due_at: DateTime<Utc>) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        self.transition(&mut inner, "reschedule", JobState::Scheduled)?;
        inner.due_at = due_at;
        inner.retry_at = None;
        inner.retry_count = 0;
        if !self.instance_supplied {
            inner.instance = None;
        }
        Ok(())
    }

    pub(crate) fn cancel(&self) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        self.transition(&mut inner, "cancel", JobState::Cancelled)
    }

    /// Flags the record as finished. Returns `true` only for the call that flipped the flag.
    pub(crate) fn finish(&self) -> bool {
        let mut inner = self.lock();
        !std::mem::replace(&mut inner.finished, true)
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use chrono::TimeDelta;

    use super::*;
    use crate::job::test::SuccessfulJob;

    fn record(max_retries: MaxRetries, instance: Option<Arc<dyn Job>>) -> JobRecord {
        JobRecord::new(
            JobType::of::<SuccessfulJob>(),
            instance,
            Priority::Medium,
            max_retries,
            Utc::now(),
            Recurrence::None,
        )
    }

    #[test]
    fn walks_the_happy_path() {
        let record = record(MaxRetries::default(), None);
        assert_eq!(record.state(), JobState::NotStarted);

        record.mark_scheduled().unwrap();
        assert!(record.is_cancellable());
        record.mark_enqueued().unwrap();
        assert!(record.is_cancellable());
        record.mark_running().unwrap();
        assert!(!record.is_cancellable());
        record.mark_success().unwrap();

        assert_eq!(record.state(), JobState::Success);
        assert!(record.is_stopped());
        assert!(record.errors().is_empty());
    }

    #[test]
    fn illegal_transition_does_not_mutate() {
        let record = record(MaxRetries::default(), None);
        record.mark_scheduled().unwrap();
        record.mark_enqueued().unwrap();
        record.mark_running().unwrap();

        let result = record.cancel();

        assert_matches!(
            result,
            Err(SchedulerError::JobOperationNotPermitted {
                state: JobState::Running,
                operation: "cancel",
                ..
            })
        );
        assert_eq!(record.state(), JobState::Running);
    }

    #[test]
    fn failure_is_recorded_with_attempt_number() {
        let record = record(MaxRetries::Limited(2), None);
        record.mark_enqueued().unwrap();
        record.mark_running().unwrap();
        record
            .mark_failed(ErrorType::Other("custom".to_owned()), "boom".to_owned())
            .unwrap();
        record.mark_retry(None).unwrap();
        record.mark_running().unwrap();
        record
            .mark_failed(ErrorType::Panic, "again".to_owned())
            .unwrap();

        let errors = record.errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].attempt, 1);
        assert_eq!(errors[1].attempt, 2);
        assert_eq!(errors[1].error_type, ErrorType::Panic);
        assert_eq!(record.retry_count(), 1);
    }

    #[test]
    fn retry_clears_resolved_instance() {
        let record = record(MaxRetries::Limited(1), None);
        record.bind_instance(Arc::new(SuccessfulJob));
        record.mark_enqueued().unwrap();
        record.mark_running().unwrap();
        record.mark_failed(ErrorType::Timeout, String::new()).unwrap();

        record.mark_retry(None).unwrap();

        assert_eq!(record.state(), JobState::Enqueued);
        assert!(record.instance().is_none());
    }

    #[test]
    fn retry_keeps_supplied_instance() {
        let record = record(MaxRetries::Limited(1), Some(Arc::new(SuccessfulJob)));
        record.mark_enqueued().unwrap();
        record.mark_running().unwrap();
        record.mark_failed(ErrorType::Timeout, String::new()).unwrap();

        record.mark_retry(None).unwrap();

        assert!(record.instance().is_some());
    }

    #[test]
    fn retry_with_backoff_waits_in_schedule() {
        let record = record(MaxRetries::Limited(1), None);
        let due_at = record.due_at();
        let retry_at = Utc::now() + TimeDelta::seconds(3);
        record.mark_enqueued().unwrap();
        record.mark_running().unwrap();
        record.mark_failed(ErrorType::Timeout, String::new()).unwrap();

        record.mark_retry(Some(retry_at)).unwrap();

        assert_eq!(record.state(), JobState::Scheduled);
        assert_eq!(record.next_due_at(), retry_at);
        assert_eq!(record.due_at(), due_at);

        record.mark_enqueued().unwrap();
        record.mark_running().unwrap();
        assert_eq!(record.next_due_at(), due_at);
    }

    #[test]
    fn recurring_resets_retries_and_advances_due_time() {
        let due_at = Utc::now();
        let record = JobRecord::new(
            JobType::of::<SuccessfulJob>(),
            None,
            Priority::Low,
            MaxRetries::Limited(1),
            due_at,
            Recurrence::Periodic(TimeDelta::seconds(10)),
        );
        record.mark_enqueued().unwrap();
        record.mark_running().unwrap();
        record.mark_failed(ErrorType::Panic, String::new()).unwrap();
        record.mark_retry(None).unwrap();
        record.mark_running().unwrap();
        record.mark_success().unwrap();

        let next = record.advance_recurrence().unwrap();
        record.mark_recurring(next).unwrap();

        assert_eq!(next, due_at + TimeDelta::seconds(10));
        assert_eq!(record.state(), JobState::Scheduled);
        assert_eq!(record.retry_count(), 0);
        assert_eq!(record.due_at(), next);
    }

    #[test]
    fn finish_flips_once() {
        let record = record(MaxRetries::default(), None);
        assert!(!record.is_finished());
        assert!(record.finish());
        assert!(!record.finish());
        assert!(record.is_finished());
    }

    #[test]
    fn ensure_scheduled_rejects_other_states() {
        let record = record(MaxRetries::default(), None);
        assert_matches!(
            record.ensure_scheduled("perform now"),
            Err(SchedulerError::JobOperationNotPermitted {
                state: JobState::NotStarted,
                ..
            })
        );
        record.mark_scheduled().unwrap();
        assert!(record.ensure_scheduled("perform now").is_ok());
    }
}
