//! Records waiting for their due time.
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::Stream;
use fxhash::FxHashMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::job::{JobId, JobState};

use super::{idle, SharedRecord};

type Key = (DateTime<Utc>, u64);

#[derive(Default)]
struct Entries {
    by_due: BTreeMap<Key, SharedRecord>,
    keys: FxHashMap<JobId, Key>,
    sequence: u64,
}

/// Records ordered by due time, ties broken by insertion order.
pub(crate) struct ScheduleQueue {
    entries: Mutex<Entries>,
    wake: Notify,
    polling_rate: Duration,
}

impl ScheduleQueue {
    pub(crate) fn new(polling_rate: Duration) -> Self {
        Self {
            entries: Mutex::default(),
            wake: Notify::new(),
            polling_rate,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a record already moved to [`JobState::Scheduled`], keyed by
    /// [`crate::job::record::JobRecord::next_due_at`].
    ///
    /// The state is checked under the queue lock: a record cancelled (or run early) between its
    /// transition and this call is left out, as nothing would ever remove it again.
    pub(crate) fn insert(&self, record: SharedRecord) {
        let due_at = record.next_due_at();
        {
            let mut guard = self.lock();
            let state = record.state();
            if state != JobState::Scheduled {
                let job_id = record.id();
                tracing::debug!(%job_id, %state, "Not scheduling job {job_id} in state {state}");
                return;
            }
            let entries = &mut *guard;
            let key = (due_at, entries.sequence);
            entries.sequence += 1;
            if let Some(previous) = entries.keys.insert(record.id(), key) {
                entries.by_due.remove(&previous);
            }
            entries.by_due.insert(key, record);
        }
        self.wake.notify_one();
    }

    /// Takes the record out of the queue, `None` if it is not (or no longer) here.
    pub(crate) fn remove(&self, job_id: JobId) -> Option<SharedRecord> {
        let mut entries = self.lock();
        let key = entries.keys.remove(&job_id)?;
        entries.by_due.remove(&key)
    }

    /// Takes every record due at `now`, earliest first.
    pub(crate) fn take_due(&self, now: DateTime<Utc>) -> Vec<SharedRecord> {
        let mut guard = self.lock();
        let entries = &mut *guard;
        let mut due = Vec::new();
        while let Some(entry) = entries.by_due.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let record = entry.remove();
            entries.keys.remove(&record.id());
            due.push(record);
        }
        due
    }

    fn next_due_at(&self) -> Option<DateTime<Utc>> {
        self.lock().by_due.first_key_value().map(|((due_at, _), _)| *due_at)
    }

    pub(crate) fn records(&self) -> Vec<SharedRecord> {
        self.lock().by_due.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().by_due.len()
    }

    /// How long the promotion loop may sleep: the polling rate, shortened when the next record
    /// is due sooner.
    fn idle_delay(&self, now: DateTime<Utc>) -> Duration {
        self.next_due_at()
            .and_then(|due_at| (due_at - now).to_std().ok())
            .map_or(self.polling_rate, |until_due| until_due.min(self.polling_rate))
    }

    /// The promotion sweep: yields records as they become due until `token` is cancelled.
    ///
    /// Due records are removed under the lock and yielded outside of it.
    pub(crate) fn due_records(
        self: Arc<Self>,
        token: CancellationToken,
    ) -> impl Stream<Item = SharedRecord> {
        let queue = self;
        stream! {
            while !token.is_cancelled() {
                let now = Utc::now();
                let due = queue.take_due(now);
                if due.is_empty() {
                    if !idle(queue.idle_delay(now), &queue.wake, &token).await {
                        break;
                    }
                    continue;
                }
                for record in due {
                    yield record;
                }
            }
        }
    }
}
