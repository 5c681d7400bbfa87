//! The structures that own a record while it moves through the scheduler.
//!
//! A live record is held by exactly one of [`schedule::ScheduleQueue`] (not yet due),
//! [`ready::ReadyQueue`] (due, waiting for a slot) or [`running::RunningSet`] (executing).
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::job::record::JobRecord;

pub(crate) mod ready;
pub(crate) mod running;
pub(crate) mod schedule;

/// Counts records the scheduler has accepted and not yet finished with.
#[derive(Debug, Default)]
pub(crate) struct JobTracker {
    outstanding: AtomicUsize,
}

impl JobTracker {
    pub(crate) fn track(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    /// Finishes the record, releasing it from the count the first time only.
    pub(crate) fn finish(&self, record: &JobRecord) {
        if record.finish() {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.outstanding() == 0
    }
}

pub(crate) type SharedRecord = Arc<JobRecord>;

/// Parks an idle polling loop for `delay`, or until woken or cancelled.
///
/// Returns `false` once the loop should stop.
pub(crate) async fn idle(delay: Duration, wake: &Notify, token: &CancellationToken) -> bool {
    if delay.is_zero() {
        tokio::task::yield_now().await;
        return !token.is_cancelled();
    }
    tokio::select! {
        _ = token.cancelled() => false,
        _ = wake.notified() => true,
        _ = tokio::time::sleep(delay) => true,
    }
}
