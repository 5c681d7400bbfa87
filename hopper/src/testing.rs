//! Helpers for testing code that schedules jobs.

/// Asserts on the jobs currently held by a [`crate::Scheduler`].
///
/// Takes a [snapshot](crate::Scheduler::snapshot) and counts the jobs matching every given
/// criterion. Criteria can be based on `in_state`, `with_priority`, `of_type`, `with_id`,
/// `due_before`, `due_after` and `retried_at_least`. Without a count, at least one matching job
/// is expected.
///
/// # Example
///
/// ```
/// # use hopper::prelude::*;
/// # use hopper::assert_snapshot;
/// # use chrono::{Utc, TimeDelta};
/// # #[derive(Default)]
/// # struct SendReport;
/// # #[async_trait::async_trait]
/// # impl Job for SendReport {
/// #     async fn perform(&self) -> ExecutionResult {
/// #         ExecutionResult::Done
/// #     }
/// # }
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let scheduler = Scheduler::default();
/// let in_an_hour = ScheduleOptions::from_delay(TimeDelta::hours(1));
///
/// scheduler.schedule::<SendReport>(in_an_hour).unwrap();
/// scheduler
///     .schedule::<SendReport>(in_an_hour.with_priority(Priority::High))
///     .unwrap();
///
/// assert_snapshot!(
///     in: scheduler,
///     in_state: JobState::Scheduled,
///     with_priority: Priority::High,
///     of_type: SendReport
/// );
///
/// assert_snapshot!(
///     2 jobs,
///     in: scheduler,
///     due_after: Utc::now(),
///     of_type: SendReport,
/// );
///
/// assert_snapshot!(0 jobs, in: scheduler, in_state: JobState::Running);
/// # });
/// ```
#[macro_export]
macro_rules! assert_snapshot {
    (1 job, in: $scheduler:expr $(, $($tail:tt)*)?) => {
        $crate::assert_snapshot!(@internal 1, $scheduler; $($($tail)*)?)
    };
    ($n:literal jobs, in: $scheduler:expr $(, $($tail:tt)*)?) => {
        $crate::assert_snapshot!(@internal $n, $scheduler; $($($tail)*)?)
    };
    (in: $scheduler:expr $(, $($tail:tt)*)?) => {{
        let (jobs, snapshot) = $crate::assert_snapshot!(@matching $scheduler; $($($tail)*)?);
        assert!(
            !jobs.is_empty(),
            "No jobs matching {}\n\nSnapshot:\n{snapshot:#?}",
            stringify!($($($tail)*)?)
        );
    }};
    (@internal $n:expr, $scheduler:expr; $($tail:tt)*) => {{
        let (jobs, snapshot) = $crate::assert_snapshot!(@matching $scheduler; $($tail)*);
        assert!(
            jobs.len() == $n,
            "Unexpected number of jobs matching {},\n\n\
            Expected {} jobs, found {} matching jobs:\n\n\
            Matching jobs:\n\
            {jobs:#?}\n\n\
            Snapshot:\n\
            {snapshot:#?}",
            stringify!($($tail)*),
            $n,
            jobs.len(),
        );
    }};
    (@matching $scheduler:expr; $($tail:tt)*) => {{
        let snapshot = $scheduler.snapshot();
        #[allow(unused_mut)]
        let mut filters: Vec<$crate::snapshot::Where> = Vec::new();
        $crate::assert_snapshot!(@query filters; $($tail)*);
        let jobs = snapshot
            .all_jobs()
            .filter(|job| filters.iter().all(|filter| filter.matches(job)))
            .cloned()
            .collect::<Vec<_>>();
        (jobs, snapshot)
    }};
    (@query $vec:ident;) => {};
    (@query $vec:ident; in_state: $state:expr $(, $($tail:tt)*)?) => {
        $vec.push($crate::snapshot::Where::state_equal($state));
        $($crate::assert_snapshot!(@query $vec; $($tail)*);)?
    };
    (@query $vec:ident; with_priority: $priority:expr $(, $($tail:tt)*)?) => {
        $vec.push($crate::snapshot::Where::priority_equal($priority));
        $($crate::assert_snapshot!(@query $vec; $($tail)*);)?
    };
    (@query $vec:ident; of_type: $job:ty $(, $($tail:tt)*)?) => {
        $vec.push($crate::snapshot::Where::of_type::<$job>());
        $($crate::assert_snapshot!(@query $vec; $($tail)*);)?
    };
    (@query $vec:ident; with_id: $id:expr $(, $($tail:tt)*)?) => {
        $vec.push($crate::snapshot::Where::id_equals($id));
        $($crate::assert_snapshot!(@query $vec; $($tail)*);)?
    };
    (@query $vec:ident; due_before: $due_at:expr $(, $($tail:tt)*)?) => {
        $vec.push($crate::snapshot::Where::due_before($due_at));
        $($crate::assert_snapshot!(@query $vec; $($tail)*);)?
    };
    (@query $vec:ident; due_after: $due_at:expr $(, $($tail:tt)*)?) => {
        $vec.push($crate::snapshot::Where::due_after($due_at));
        $($crate::assert_snapshot!(@query $vec; $($tail)*);)?
    };
    (@query $vec:ident; retried_at_least: $retries:expr $(, $($tail:tt)*)?) => {
        $vec.push($crate::snapshot::Where::retried_at_least($retries));
        $($crate::assert_snapshot!(@query $vec; $($tail)*);)?
    };
}
