//! The job contract and the types describing a job's lifecycle.
use std::{
    error::Error,
    fmt::Display,
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ConfigError;

pub mod instantiator;
pub mod options;
pub mod record;

/// A unit of work that can be scheduled.
///
/// Only [`Job::perform`] is required. A job that fails, either by returning
/// [`ExecutionResult::Error`], by panicking, or by exceeding its [`Job::timeout`], is handed to
/// the retry policy of its record.
///
/// # Example
///
/// ```
/// # use hopper::prelude::*;
/// #[derive(Default)]
/// struct RefreshCache;
///
/// #[async_trait::async_trait]
/// impl Job for RefreshCache {
///     fn priority() -> Priority {
///         Priority::High
///     }
///
///     async fn perform(&self) -> ExecutionResult {
///         ExecutionResult::Done
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// The priority of this job type, used when the schedule options do not set one.
    fn priority() -> Priority
    where
        Self: Sized,
    {
        Priority::default()
    }

    /// Hook ran before [`Job::perform`]. An error here fails the attempt without running the body.
    async fn before_perform(&self) -> ExecutionResult {
        ExecutionResult::Done
    }

    async fn perform(&self) -> ExecutionResult;

    /// The maximum duration an attempt may take before it is considered failed.
    fn timeout(&self) -> Option<std::time::Duration> {
        None
    }
}

/// The outcome of [`Job::before_perform`] and [`Job::perform`].
pub enum ExecutionResult {
    Done,
    Error { error: Box<dyn ExecutionError> },
}

impl<T> From<T> for ExecutionResult
where
    T: ExecutionError + 'static,
{
    fn from(value: T) -> Self {
        Self::Error {
            error: Box::new(value),
        }
    }
}

pub trait ExecutionError: Error + Send {
    fn error_type(&self) -> &'static str;
}

/// A job wrapping an async closure, created by [`crate::Scheduler::schedule_fn`].
pub struct FnJob<F>(F);

impl<F> FnJob<F> {
    pub fn new(function: F) -> Self {
        Self(function)
    }
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecutionResult> + Send + 'static,
{
    async fn perform(&self) -> ExecutionResult {
        (self.0)().await
    }
}

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash, Serialize)]
pub struct JobId(u64);

impl JobId {
    pub(crate) fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl From<JobId> for u64 {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

/// The lifecycle state of a [`record::JobRecord`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize)]
pub enum JobState {
    /// Created but not yet handed to the scheduler.
    NotStarted,
    /// Waiting for its due time.
    Scheduled,
    /// Due, waiting for a free concurrency slot.
    Enqueued,
    Running,
    Success,
    Failed,
    /// Cancelled before it started running.
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 7] = [
        JobState::NotStarted,
        JobState::Scheduled,
        JobState::Enqueued,
        JobState::Running,
        JobState::Success,
        JobState::Failed,
        JobState::Cancelled,
    ];

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (NotStarted, Scheduled | Enqueued)
                | (Scheduled, Enqueued | Cancelled)
                | (Enqueued, Running | Cancelled)
                | (Running, Success | Failed)
                | (Failed, Enqueued | Scheduled)
                | (Success, Scheduled)
        )
    }

    pub fn is_cancellable(self) -> bool {
        matches!(self, JobState::Scheduled | JobState::Enqueued)
    }

    pub fn is_stopped(self) -> bool {
        matches!(
            self,
            JobState::Cancelled | JobState::Failed | JobState::Success
        )
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// The priority of a job when competing for a concurrency slot.
///
/// Priorities only matter when the concurrency budget is exhausted: while slots are free jobs
/// run in the order they become due.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub const HIGHEST: Priority = Priority::High;
}

/// How many times a failed job is retried.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub enum MaxRetries {
    Unlimited,
    Limited(u32),
}

impl Default for MaxRetries {
    fn default() -> Self {
        Self::Limited(0)
    }
}

impl MaxRetries {
    /// Whether a job that has already been retried `retry_count` times may be retried again.
    pub fn allows(&self, retry_count: u32) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(max) => retry_count < *max,
        }
    }
}

impl From<u32> for MaxRetries {
    fn from(value: u32) -> Self {
        Self::Limited(value)
    }
}

/// Converts the conventional signed representation where `-1` means unlimited.
impl TryFrom<i64> for MaxRetries {
    type Error = ConfigError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Unlimited),
            value => u32::try_from(value)
                .map(Self::Limited)
                .map_err(|_| ConfigError::InvalidMaxRetries(value)),
        }
    }
}

/// A failed attempt recorded on a job record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobError {
    pub attempt: u32,
    pub error_type: ErrorType,
    pub details: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorType {
    Panic,
    Timeout,
    Instantiation,
    Other(String),
}

impl Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Panic => write!(f, "panic"),
            Self::Timeout => write!(f, "timeout"),
            Self::Instantiation => write!(f, "instantiation"),
            Self::Other(other) => write!(f, "{other}"),
        }
    }
}
