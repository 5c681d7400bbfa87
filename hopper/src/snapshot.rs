//! Point in time views of the scheduler's queues.
//!
//! A [`Snapshot`] reads the schedule queue, the ready queue and the running set one after
//! the other, each under its own lock. A record moving between two of them while the snapshot is
//! taken may be missed or, rarely, reported twice.
//!
//! # Example
//!
//! ```
//! # use hopper::prelude::*;
//! # #[derive(Default)]
//! # struct Cleanup;
//! # #[async_trait::async_trait]
//! # impl Job for Cleanup {
//! #     async fn perform(&self) -> ExecutionResult {
//! #         ExecutionResult::Done
//! #     }
//! # }
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let scheduler = Scheduler::default();
//! scheduler
//!     .schedule::<Cleanup>(ScheduleOptions::from_delay(chrono::TimeDelta::minutes(5)))
//!     .unwrap();
//!
//! let snapshot = scheduler.snapshot();
//! let waiting = snapshot.query(
//!     &Where::of_type::<Cleanup>().and(Where::state_equal(JobState::Scheduled)),
//! );
//! assert_eq!(waiting.len(), 1);
//! # }
//! ```
use std::any::type_name;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    job::{record::JobRecord, Job, JobId, JobState, MaxRetries, Priority},
    queue::SharedRecord,
};

/// An immutable projection of a [`JobRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub state: JobState,
    pub priority: Priority,
    pub max_retries: MaxRetries,
    pub retry_count: u32,
    pub job_type: &'static str,
    pub due_at: DateTime<Utc>,
    pub next_due_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobSnapshot {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id(),
            state: record.state(),
            priority: record.priority(),
            max_retries: record.max_retries(),
            retry_count: record.retry_count(),
            job_type: record.job_type().name(),
            due_at: record.due_at(),
            next_due_at: record.next_due_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    /// Records waiting for their due time, earliest first.
    pub scheduled: Vec<JobSnapshot>,
    /// Records waiting for a concurrency slot, in arrival order.
    pub enqueued: Vec<JobSnapshot>,
    /// Records currently executing.
    pub running: Vec<JobSnapshot>,
}

impl Snapshot {
    pub(crate) fn new(
        scheduled: Vec<SharedRecord>,
        enqueued: Vec<SharedRecord>,
        running: Vec<SharedRecord>,
    ) -> Self {
        fn project(records: Vec<SharedRecord>) -> Vec<JobSnapshot> {
            records
                .iter()
                .map(|record| JobSnapshot::from(record.as_ref()))
                .collect()
        }
        Self {
            taken_at: Utc::now(),
            scheduled: project(scheduled),
            enqueued: project(enqueued),
            running: project(running),
        }
    }

    pub fn all_jobs(&self) -> impl Iterator<Item = &JobSnapshot> {
        self.scheduled
            .iter()
            .chain(self.enqueued.iter())
            .chain(self.running.iter())
    }

    pub fn len(&self) -> usize {
        self.scheduled.len() + self.enqueued.len() + self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find(&self, job_id: JobId) -> Option<&JobSnapshot> {
        self.all_jobs().find(|job| job.id == job_id)
    }

    /// Every job in the snapshot matching the filter.
    pub fn query(&self, filter: &Where) -> Vec<&JobSnapshot> {
        self.all_jobs().filter(|job| filter.matches(job)).collect()
    }
}

/// A filter over [`JobSnapshot`]s, combined with [`Where::and`], [`Where::or`] and `!`.
#[derive(Debug, Eq, PartialEq, Clone)]
#[non_exhaustive]
pub struct Where(pub(crate) Query);

#[derive(Debug, Eq, PartialEq, Clone)]
pub(crate) enum Query {
    Not(Box<Query>),
    And(Vec<Query>),
    Or(Vec<Query>),
    IdEquals(JobId),
    IdIn(Vec<JobId>),
    StateEqual(JobState),
    PriorityEqual(Priority),
    JobTypeEqual(&'static str),
    DueBefore(DateTime<Utc>),
    DueAfter(DateTime<Utc>),
    RetriedAtLeast(u32),
}

impl Where {
    pub fn and(mut self, other: Where) -> Self {
        if let Query::And(ref mut constraints) = self.0 {
            constraints.push(other.0);
        } else {
            self.0 = Query::And(vec![self.0, other.0]);
        }
        self
    }

    pub fn or(mut self, other: Where) -> Self {
        if let Query::Or(ref mut constraints) = self.0 {
            constraints.push(other.0);
        } else {
            self.0 = Query::Or(vec![self.0, other.0]);
        }
        self
    }

    pub fn id_equals(id: JobId) -> Self {
        Self(Query::IdEquals(id))
    }

    pub fn id_in(ids: impl IntoIterator<Item = JobId>) -> Self {
        Self(Query::IdIn(ids.into_iter().collect()))
    }

    pub fn state_equal(state: JobState) -> Self {
        Self(Query::StateEqual(state))
    }

    pub fn priority_equal(priority: Priority) -> Self {
        Self(Query::PriorityEqual(priority))
    }

    pub fn of_type<J: Job>() -> Self {
        Self(Query::JobTypeEqual(type_name::<J>()))
    }

    /// Jobs next due strictly before the given time.
    pub fn due_before(due_at: DateTime<Utc>) -> Self {
        Self(Query::DueBefore(due_at))
    }

    /// Jobs next due strictly after the given time.
    pub fn due_after(due_at: DateTime<Utc>) -> Self {
        Self(Query::DueAfter(due_at))
    }

    pub fn retried_at_least(retries: u32) -> Self {
        Self(Query::RetriedAtLeast(retries))
    }

    pub fn matches(&self, job: &JobSnapshot) -> bool {
        self.0.matches(job)
    }
}

impl std::ops::Not for Where {
    type Output = Self;
    fn not(self) -> Self {
        Self(Query::Not(Box::new(self.0)))
    }
}

pub(crate) trait Queryable {
    fn matches(&self, job: &JobSnapshot) -> bool;
}

impl Queryable for Query {
    fn matches(&self, job: &JobSnapshot) -> bool {
        match self {
            Query::Not(inner) => !inner.matches(job),
            Query::And(inner) => inner.iter().all(|query| query.matches(job)),
            Query::Or(inner) => inner.iter().any(|query| query.matches(job)),
            Query::IdEquals(id) => job.id == *id,
            Query::IdIn(ids) => ids.contains(&job.id),
            Query::StateEqual(state) => job.state == *state,
            Query::PriorityEqual(priority) => job.priority == *priority,
            Query::JobTypeEqual(job_type) => job.job_type == *job_type,
            Query::DueBefore(due_at) => job.next_due_at < *due_at,
            Query::DueAfter(due_at) => job.next_due_at > *due_at,
            Query::RetriedAtLeast(retries) => job.retry_count >= *retries,
        }
    }
}
