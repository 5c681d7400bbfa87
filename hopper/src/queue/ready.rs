//! Records that are due and waiting for a concurrency slot.
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_stream::stream;
use futures::Stream;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::job::{JobId, JobState, Priority};

use super::{idle, SharedRecord};

/// A record picked for execution together with the concurrency slot it occupies.
pub(crate) type Fired = (SharedRecord, OwnedSemaphorePermit);

/// An arrival-ordered list of records, dispatched highest priority first.
pub(crate) struct ReadyQueue {
    records: Mutex<Vec<SharedRecord>>,
    permits: Arc<Semaphore>,
    wake: Notify,
    polling_rate: Duration,
}

impl ReadyQueue {
    pub(crate) fn new(max_concurrent_jobs: usize, polling_rate: Duration) -> Self {
        Self {
            records: Mutex::default(),
            permits: Arc::new(Semaphore::new(max_concurrent_jobs)),
            wake: Notify::new(),
            polling_rate,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SharedRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a record already moved to [`JobState::Enqueued`].
    ///
    /// Records cancelled before reaching the queue are left out.
    pub(crate) fn push(&self, record: SharedRecord) {
        {
            let mut records = self.lock();
            let state = record.state();
            if state != JobState::Enqueued {
                let job_id = record.id();
                tracing::debug!(%job_id, %state, "Not enqueuing job {job_id} in state {state}");
                return;
            }
            records.push(record);
        }
        self.wake.notify_one();
    }

    pub(crate) fn remove(&self, job_id: JobId) -> Option<SharedRecord> {
        let mut records = self.lock();
        let index = records.iter().position(|record| record.id() == job_id)?;
        Some(records.remove(index))
    }

    /// Removes the first record of the highest priority present.
    pub(crate) fn take_next(&self) -> Option<SharedRecord> {
        let mut records = self.lock();
        let mut candidate: Option<(usize, Priority)> = None;
        for (index, record) in records.iter().enumerate() {
            let priority = record.priority();
            if candidate.map_or(true, |(_, best)| priority > best) {
                candidate = Some((index, priority));
            }
            if priority == Priority::HIGHEST {
                break;
            }
        }
        candidate.map(|(index, _)| records.remove(index))
    }

    pub(crate) fn records(&self) -> Vec<SharedRecord> {
        self.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free concurrency slots.
    pub(crate) fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    #[cfg(test)]
    pub(crate) fn semaphore(&self) -> Arc<Semaphore> {
        self.permits.clone()
    }

    /// The dispatch loop: waits for a free slot, then yields the best ready record with the slot
    /// it holds, until `token` is cancelled.
    pub(crate) fn dispatch(self: Arc<Self>, token: CancellationToken) -> impl Stream<Item = Fired> {
        let queue = self;
        stream! {
            while !token.is_cancelled() {
                if queue.is_empty() {
                    if !idle(queue.polling_rate, &queue.wake, &token).await {
                        break;
                    }
                    continue;
                }
                let permit = tokio::select! {
                    permit = queue.permits.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                    _ = token.cancelled() => break,
                };
                // The queue may have been drained by a cancellation while waiting for the slot.
                if let Some(record) = queue.take_next() {
                    yield (record, permit);
                }
            }
        }
    }
}
