//! Options accepted by the `schedule*` methods of [`crate::Scheduler`].
use chrono::{DateTime, TimeDelta, Utc};
use cron::Schedule;

use crate::{recurrence::Recurrence, SchedulerError};

use super::{MaxRetries, Priority};

/// The shortest interval accepted for periodic jobs.
pub const MIN_PERIODIC_INTERVAL: TimeDelta = TimeDelta::seconds(1);

/// Everything the scheduler needs from a set of options to build a record.
#[derive(Debug)]
pub(crate) struct Plan {
    pub due_at: DateTime<Utc>,
    pub recurrence: Recurrence,
    pub priority: Option<Priority>,
    pub max_retries: MaxRetries,
}

fn offset(at: DateTime<Utc>, delta: TimeDelta) -> Result<DateTime<Utc>, SchedulerError> {
    at.checked_add_signed(delta).ok_or_else(|| {
        SchedulerError::InvalidArgument(format!("{delta} after {at} is out of range"))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Start {
    In(TimeDelta),
    At(DateTime<Utc>),
}

impl Default for Start {
    fn default() -> Self {
        Self::In(TimeDelta::zero())
    }
}

/// Options for a one-off job.
///
/// # Example
///
/// ```
/// # use hopper::prelude::*;
/// # use chrono::TimeDelta;
/// let options = ScheduleOptions::from_delay(TimeDelta::seconds(30))
///     .with_priority(Priority::High)
///     .with_max_retries(3);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleOptions {
    start: Start,
    priority: Option<Priority>,
    max_retries: MaxRetries,
}

impl ScheduleOptions {
    /// Run as soon as possible, with the job type's priority and no retries.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_delay(delay: TimeDelta) -> Self {
        Self::new().with_delay(delay)
    }

    pub fn from_priority(priority: Priority) -> Self {
        Self::new().with_priority(priority)
    }

    /// Run once `delay` has elapsed. A negative delay is treated as no delay.
    pub fn with_delay(self, delay: TimeDelta) -> Self {
        Self {
            start: Start::In(delay),
            ..self
        }
    }

    pub fn schedule_at(self, schedule_at: DateTime<Utc>) -> Self {
        Self {
            start: Start::At(schedule_at),
            ..self
        }
    }

    /// Overrides the priority declared by the job type.
    pub fn with_priority(self, priority: Priority) -> Self {
        Self {
            priority: Some(priority),
            ..self
        }
    }

    pub fn with_max_retries(self, max_retries: impl Into<MaxRetries>) -> Self {
        Self {
            max_retries: max_retries.into(),
            ..self
        }
    }

    pub fn with_unlimited_retries(self) -> Self {
        self.with_max_retries(MaxRetries::Unlimited)
    }

    pub(crate) fn plan(&self, now: DateTime<Utc>) -> Result<Plan, SchedulerError> {
        let due_at = match self.start {
            Start::In(delay) => offset(now, delay.max(TimeDelta::zero()))?,
            Start::At(at) => at,
        };
        Ok(Plan {
            due_at,
            recurrence: Recurrence::None,
            priority: self.priority,
            max_retries: self.max_retries,
        })
    }
}

#[derive(Debug, Clone)]
enum Every {
    Interval(TimeDelta),
    Cron(Box<Schedule>),
}

/// Options for a job that fires repeatedly, either at a fixed interval or on a cron schedule.
///
/// A periodic job first fires one interval after its (optional) delay, every following fire is
/// one interval after the previous due time.
#[derive(Debug, Clone)]
pub struct RecurrentScheduleOptions {
    every: Every,
    delay: TimeDelta,
    priority: Option<Priority>,
    max_retries: MaxRetries,
}

impl RecurrentScheduleOptions {
    pub fn every(interval: TimeDelta) -> Self {
        Self::with_every(Every::Interval(interval))
    }

    pub fn cron(schedule: Schedule) -> Self {
        Self::with_every(Every::Cron(Box::new(schedule)))
    }

    fn with_every(every: Every) -> Self {
        Self {
            every,
            delay: TimeDelta::zero(),
            priority: None,
            max_retries: MaxRetries::default(),
        }
    }

    pub fn with_delay(self, delay: TimeDelta) -> Self {
        Self { delay, ..self }
    }

    pub fn with_priority(self, priority: Priority) -> Self {
        Self {
            priority: Some(priority),
            ..self
        }
    }

    /// Retries granted to each occurrence.
    pub fn with_max_retries(self, max_retries: impl Into<MaxRetries>) -> Self {
        Self {
            max_retries: max_retries.into(),
            ..self
        }
    }

    pub fn with_unlimited_retries(self) -> Self {
        self.with_max_retries(MaxRetries::Unlimited)
    }

    pub(crate) fn plan(self, now: DateTime<Utc>) -> Result<Plan, SchedulerError> {
        let start = offset(now, self.delay.max(TimeDelta::zero()))?;
        let (due_at, recurrence) = match self.every {
            Every::Interval(interval) if interval < MIN_PERIODIC_INTERVAL => {
                return Err(SchedulerError::InvalidArgument(format!(
                    "periodic interval must be at least {MIN_PERIODIC_INTERVAL}, got {interval}"
                )));
            }
            Every::Interval(interval) => {
                (offset(start, interval)?, Recurrence::Periodic(interval))
            }
            Every::Cron(schedule) => {
                let due_at = schedule.after(&start).next().ok_or_else(|| {
                    SchedulerError::InvalidArgument("cron schedule has no upcoming time".into())
                })?;
                (due_at, Recurrence::Cron(schedule))
            }
        };
        Ok(Plan {
            due_at,
            recurrence,
            priority: self.priority,
            max_retries: self.max_retries,
        })
    }
}

/// Options for a job that fires once at each of a set of dates.
#[derive(Debug, Clone, Default)]
pub struct CalendarScheduleOptions {
    dates: Vec<DateTime<Utc>>,
    priority: Option<Priority>,
    max_retries: MaxRetries,
}

impl CalendarScheduleOptions {
    pub fn with_dates(dates: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        Self {
            dates: dates.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_date(self, date: DateTime<Utc>) -> Self {
        let mut dates = self.dates;
        dates.push(date);
        Self { dates, ..self }
    }

    pub fn with_priority(self, priority: Priority) -> Self {
        Self {
            priority: Some(priority),
            ..self
        }
    }

    pub fn with_max_retries(self, max_retries: impl Into<MaxRetries>) -> Self {
        Self {
            max_retries: max_retries.into(),
            ..self
        }
    }

    pub fn with_unlimited_retries(self) -> Self {
        self.with_max_retries(MaxRetries::Unlimited)
    }

    pub(crate) fn plan(self, now: DateTime<Utc>) -> Result<Plan, SchedulerError> {
        if let Some(past) = self.dates.iter().find(|date| **date < now) {
            return Err(SchedulerError::InvalidArgument(format!(
                "calendar date {past} is in the past"
            )));
        }
        let mut recurrence = Recurrence::calendar(self.dates);
        let due_at = recurrence.next_due_time(now).ok_or_else(|| {
            SchedulerError::InvalidArgument("calendar schedule requires at least one date".into())
        })?;
        Ok(Plan {
            due_at,
            recurrence,
            priority: self.priority,
            max_retries: self.max_retries,
        })
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn one_off_defaults_to_now() {
        let now = Utc::now();
        let plan = ScheduleOptions::new().plan(now).unwrap();

        assert_eq!(plan.due_at, now);
        assert_eq!(plan.priority, None);
        assert_eq!(plan.max_retries, MaxRetries::Limited(0));
        assert!(plan.recurrence.is_none());
    }

    #[test]
    fn one_off_delay_and_overrides() {
        let now = Utc::now();
        let plan = ScheduleOptions::from_delay(TimeDelta::seconds(5))
            .with_priority(Priority::Low)
            .with_unlimited_retries()
            .plan(now)
            .unwrap();

        assert_eq!(plan.due_at, now + TimeDelta::seconds(5));
        assert_eq!(plan.priority, Some(Priority::Low));
        assert_eq!(plan.max_retries, MaxRetries::Unlimited);
    }

    #[test]
    fn one_off_negative_delay_is_now() {
        let now = Utc::now();
        let plan = ScheduleOptions::from_delay(TimeDelta::seconds(-5))
            .plan(now)
            .unwrap();
        assert_eq!(plan.due_at, now);
    }

    #[test]
    fn one_off_delay_out_of_range_is_rejected() {
        let result = ScheduleOptions::from_delay(TimeDelta::MAX).plan(Utc::now());
        assert_matches!(result, Err(SchedulerError::InvalidArgument(_)));
    }

    #[test]
    fn one_off_schedule_at() {
        let now = Utc::now();
        let at = now + TimeDelta::hours(1);
        let plan = ScheduleOptions::new()
            .with_delay(TimeDelta::seconds(1))
            .schedule_at(at)
            .plan(now)
            .unwrap();
        assert_eq!(plan.due_at, at);
    }

    #[test]
    fn periodic_first_fire_is_one_interval_after_delay() {
        let now = Utc::now();
        let plan = RecurrentScheduleOptions::every(TimeDelta::seconds(10))
            .with_delay(TimeDelta::seconds(2))
            .with_max_retries(1)
            .plan(now)
            .unwrap();

        assert_eq!(plan.due_at, now + TimeDelta::seconds(12));
        assert_eq!(plan.max_retries, MaxRetries::Limited(1));
        assert_matches!(plan.recurrence, Recurrence::Periodic(interval) if interval == TimeDelta::seconds(10));
    }

    #[test]
    fn periodic_rejects_short_interval() {
        let result = RecurrentScheduleOptions::every(TimeDelta::milliseconds(500)).plan(Utc::now());
        assert_matches!(result, Err(SchedulerError::InvalidArgument(_)));
    }

    #[test]
    fn periodic_out_of_range_start_is_rejected() {
        let result = RecurrentScheduleOptions::every(TimeDelta::seconds(10))
            .with_delay(TimeDelta::MAX)
            .plan(Utc::now());
        assert_matches!(result, Err(SchedulerError::InvalidArgument(_)));

        let result = RecurrentScheduleOptions::every(TimeDelta::MAX).plan(Utc::now());
        assert_matches!(result, Err(SchedulerError::InvalidArgument(_)));
    }

    #[test]
    fn cron_first_fire_follows_schedule() {
        let now = Utc::now();
        let schedule = Schedule::from_str("* * * * * *").unwrap();
        let plan = RecurrentScheduleOptions::cron(schedule)
            .with_priority(Priority::High)
            .plan(now)
            .unwrap();

        assert!(plan.due_at > now);
        assert!(plan.due_at <= now + TimeDelta::seconds(1));
        assert_eq!(plan.priority, Some(Priority::High));
        assert_matches!(plan.recurrence, Recurrence::Cron(_));
    }

    #[test]
    fn calendar_pops_earliest_date_first() {
        let now = Utc::now();
        let early = now + TimeDelta::minutes(1);
        let late = now + TimeDelta::minutes(5);
        let mut plan = CalendarScheduleOptions::with_dates([late])
            .with_date(early)
            .plan(now)
            .unwrap();

        assert_eq!(plan.due_at, early);
        assert_eq!(plan.recurrence.next_due_time(early), Some(late));
        assert_eq!(plan.recurrence.next_due_time(late), None);
    }

    #[test]
    fn calendar_rejects_empty_dates() {
        let result = CalendarScheduleOptions::default().plan(Utc::now());
        assert_matches!(result, Err(SchedulerError::InvalidArgument(_)));
    }

    #[test]
    fn calendar_rejects_past_dates() {
        let now = Utc::now();
        let result = CalendarScheduleOptions::with_dates([now + TimeDelta::minutes(1)])
            .with_date(now - TimeDelta::minutes(1))
            .plan(now);
        assert_matches!(result, Err(SchedulerError::InvalidArgument(_)));
    }
}
