//! Records whose job body is currently executing.
use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use fxhash::FxHashMap;

use super::SharedRecord;

/// Identifies one execution of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct TaskId(u64);

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

#[derive(Default)]
pub(crate) struct RunningSet {
    tasks: Mutex<FxHashMap<TaskId, SharedRecord>>,
    next_task_id: AtomicU64,
}

impl RunningSet {
    fn lock(&self) -> MutexGuard<'_, FxHashMap<TaskId, SharedRecord>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an execution. It stays in the set until the returned guard is dropped.
    pub(crate) fn register(self: &Arc<Self>, record: SharedRecord) -> RunningTask {
        let task_id = TaskId(self.next_task_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(task_id, record);
        RunningTask {
            task_id,
            set: self.clone(),
        }
    }

    /// In-flight records, in execution start order.
    pub(crate) fn records(&self) -> Vec<SharedRecord> {
        let tasks = self.lock();
        let mut records = tasks.iter().collect::<Vec<_>>();
        records.sort_unstable_by_key(|(task_id, _)| **task_id);
        records.into_iter().map(|(_, record)| record.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Removes its execution from the [`RunningSet`] when dropped, whichever way the execution ends.
pub(crate) struct RunningTask {
    task_id: TaskId,
    set: Arc<RunningSet>,
}

impl RunningTask {
    pub(crate) fn task_id(&self) -> TaskId {
        self.task_id
    }
}

impl Drop for RunningTask {
    fn drop(&mut self) {
        self.set.lock().remove(&self.task_id);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{job::Priority, queue::test::record};

    #[test]
    fn guard_removes_task() {
        let set = Arc::new(RunningSet::default());
        let first = record(Priority::Low);
        let second = record(Priority::High);

        let first_task = set.register(first.clone());
        let second_task = set.register(second.clone());
        assert_ne!(first_task.task_id(), second_task.task_id());
        assert_eq!(
            set.records()
                .iter()
                .map(|record| record.id())
                .collect::<Vec<_>>(),
            vec![first.id(), second.id()]
        );

        drop(first_task);
        assert_eq!(set.len(), 1);
        assert_eq!(set.records()[0].id(), second.id());

        drop(second_task);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn same_record_can_run_under_distinct_tasks() {
        let set = Arc::new(RunningSet::default());
        let record = record(Priority::Medium);

        let first = set.register(record.clone());
        let second = set.register(record);

        assert_eq!(set.len(), 2);
        drop((first, second));
        assert_eq!(set.len(), 0);
    }
}
