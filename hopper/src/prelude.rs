//! The purpose of this module is to alleviate the need to import many of the `[hopper]` types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use hopper::prelude::*;
//! ```
pub use crate::backoff::{Backoff, Jitter, Strategy};
pub use crate::config::{ConfigError, SchedulerConfig};
pub use crate::job::instantiator::{DependencyProvider, JobRegistry, JobType};
pub use crate::job::options::{CalendarScheduleOptions, RecurrentScheduleOptions, ScheduleOptions};
pub use crate::job::record::JobRecord;
pub use crate::job::{
    ErrorType, ExecutionError, ExecutionResult, FnJob, Job, JobError, JobId, JobState, MaxRetries,
    Priority,
};
pub use crate::snapshot::{JobSnapshot, Snapshot, Where};
pub use crate::{Scheduler, SchedulerError};
