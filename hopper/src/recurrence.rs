//! Computes the next due time of periodic, calendar and cron jobs.
use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};
use cron::Schedule;

use crate::job::record::JobRecord;

/// How a record is recycled once it completes.
#[derive(Debug, Clone, Default)]
pub enum Recurrence {
    #[default]
    None,
    /// Fires every `interval`, measured from the previous due time.
    Periodic(TimeDelta),
    /// Fires once at each remaining date, in order.
    Calendar(VecDeque<DateTime<Utc>>),
    /// Fires at each instant of the cron schedule.
    Cron(Box<Schedule>),
}

impl Recurrence {
    /// Builds a calendar recurrence from dates in any order. Duplicate dates fire once.
    pub(crate) fn calendar(dates: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        let mut dates = dates.into_iter().collect::<Vec<_>>();
        dates.sort_unstable();
        dates.dedup();
        Self::Calendar(dates.into())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The due time following `previous`, consuming it for calendar recurrences.
    ///
    /// Calendar dates that are already in the past when popped are returned as is, the job
    /// then fires late rather than being skipped.
    pub(crate) fn next_due_time(&mut self, previous: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::None => None,
            Self::Periodic(interval) => previous.checked_add_signed(*interval),
            Self::Calendar(dates) => dates.pop_front(),
            Self::Cron(schedule) => schedule.after(&previous).next(),
        }
    }
}

/// Decides whether a completed record is recycled, and when.
pub(crate) struct RecurrencePolicy;

impl RecurrencePolicy {
    /// Advances the record's recurrence and returns its next due time, if any.
    pub(crate) fn next_due_time(record: &JobRecord) -> Option<DateTime<Utc>> {
        record.advance_recurrence()
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn none_has_no_next_due_time() {
        let mut recurrence = Recurrence::None;
        assert!(recurrence.is_none());
        assert_eq!(recurrence.next_due_time(Utc::now()), None);
    }

    #[test]
    fn periodic_anchors_to_previous_due_time() {
        let previous = Utc::now();
        let mut recurrence = Recurrence::Periodic(TimeDelta::seconds(5));
        assert_eq!(
            recurrence.next_due_time(previous),
            Some(previous + TimeDelta::seconds(5))
        );
        assert_eq!(
            recurrence.next_due_time(previous + TimeDelta::seconds(5)),
            Some(previous + TimeDelta::seconds(10))
        );
    }

    #[test]
    fn periodic_ends_at_the_end_of_time() {
        let mut recurrence = Recurrence::Periodic(TimeDelta::days(1));
        assert_eq!(recurrence.next_due_time(DateTime::<Utc>::MAX_UTC), None);
    }

    #[test]
    fn calendar_walks_sorted_dates_until_exhausted() {
        let now = Utc::now();
        let first = now + TimeDelta::minutes(1);
        let second = now + TimeDelta::minutes(2);
        let mut recurrence = Recurrence::calendar([second, first, second]);

        assert_eq!(recurrence.next_due_time(now), Some(first));
        assert_eq!(recurrence.next_due_time(first), Some(second));
        assert_eq!(recurrence.next_due_time(second), None);
    }

    #[test]
    fn calendar_keeps_past_dates() {
        let now = Utc::now();
        let past = now - TimeDelta::minutes(1);
        let mut recurrence = Recurrence::calendar([past]);

        assert_eq!(recurrence.next_due_time(now), Some(past));
    }

    #[test]
    fn cron_fires_strictly_after_previous() {
        let schedule = Schedule::from_str("0 * * * * *").unwrap();
        let previous = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut recurrence = Recurrence::Cron(Box::new(schedule));

        let next = recurrence.next_due_time(previous).unwrap();
        assert_eq!(next, previous + TimeDelta::minutes(1));
    }
}
