//! Configuration of a [`crate::Scheduler`].
//!
//! # Example
//!
//! ```
//! # use hopper::prelude::*;
//! # use chrono::TimeDelta;
//! let config = SchedulerConfig::builder()
//!     .with_max_concurrent_jobs(10)
//!     .with_schedule_polling_rate(TimeDelta::milliseconds(250))
//!     .with_retry_backoff(Backoff::exponential(TimeDelta::seconds(1)))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.max_concurrent_jobs(), 10);
//! ```
use std::{sync::Arc, time::Duration};

use chrono::TimeDelta;

use crate::{backoff::Strategy, job::instantiator::DependencyProvider};

pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 5;
pub const DEFAULT_QUEUE_POLLING_RATE: TimeDelta = TimeDelta::milliseconds(100);
pub const DEFAULT_SCHEDULE_POLLING_RATE: TimeDelta = TimeDelta::milliseconds(100);
pub const DEFAULT_WAIT_POLLING_RATE: TimeDelta = TimeDelta::milliseconds(50);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("The maximum number of concurrent jobs must be at least 1")]
    ZeroConcurrency,
    #[error("The {name} polling rate must not be negative, got {rate}")]
    NegativePollingRate { name: &'static str, rate: TimeDelta },
    #[error("Invalid maximum retry count {0}: expected -1 for unlimited or a non negative count")]
    InvalidMaxRetries(i64),
}

/// Validated scheduler configuration, built with [`SchedulerConfig::builder`].
#[derive(Clone)]
pub struct SchedulerConfig {
    max_concurrent_jobs: usize,
    queue_polling_rate: Duration,
    schedule_polling_rate: Duration,
    wait_polling_rate: Duration,
    dependency_provider: Option<Arc<dyn DependencyProvider>>,
    retry_backoff: Option<Arc<dyn Strategy>>,
}

impl std::fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("max_concurrent_jobs", &self.max_concurrent_jobs)
            .field("queue_polling_rate", &self.queue_polling_rate)
            .field("schedule_polling_rate", &self.schedule_polling_rate)
            .field("wait_polling_rate", &self.wait_polling_rate)
            .field("dependency_provider", &self.dependency_provider.is_some())
            .field("retry_backoff", &self.retry_backoff.is_some())
            .finish()
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            queue_polling_rate: to_std(DEFAULT_QUEUE_POLLING_RATE),
            schedule_polling_rate: to_std(DEFAULT_SCHEDULE_POLLING_RATE),
            wait_polling_rate: to_std(DEFAULT_WAIT_POLLING_RATE),
            dependency_provider: None,
            retry_backoff: None,
        }
    }
}

fn to_std(rate: TimeDelta) -> Duration {
    rate.to_std().unwrap_or(Duration::ZERO)
}

impl SchedulerConfig {
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs
    }

    /// How long the dispatch loop sleeps when the ready queue is empty.
    pub fn queue_polling_rate(&self) -> Duration {
        self.queue_polling_rate
    }

    /// How long the promotion loop sleeps when no scheduled job is due.
    pub fn schedule_polling_rate(&self) -> Duration {
        self.schedule_polling_rate
    }

    /// How often [`crate::Scheduler::wait_job`] and [`crate::Scheduler::wait_all_jobs`] check
    /// for completion.
    pub fn wait_polling_rate(&self) -> Duration {
        self.wait_polling_rate
    }

    pub(crate) fn dependency_provider(&self) -> Option<Arc<dyn DependencyProvider>> {
        self.dependency_provider.clone()
    }

    pub(crate) fn retry_backoff(&self) -> Option<Arc<dyn Strategy>> {
        self.retry_backoff.clone()
    }
}

#[derive(Default)]
pub struct SchedulerConfigBuilder {
    max_concurrent_jobs: Option<usize>,
    queue_polling_rate: Option<TimeDelta>,
    schedule_polling_rate: Option<TimeDelta>,
    wait_polling_rate: Option<TimeDelta>,
    dependency_provider: Option<Arc<dyn DependencyProvider>>,
    retry_backoff: Option<Arc<dyn Strategy>>,
}

impl SchedulerConfigBuilder {
    /// The concurrency budget, at least 1. Defaults to [`DEFAULT_MAX_CONCURRENT_JOBS`].
    pub fn with_max_concurrent_jobs(self, max_concurrent_jobs: usize) -> Self {
        Self {
            max_concurrent_jobs: Some(max_concurrent_jobs),
            ..self
        }
    }

    /// A rate of zero makes the dispatch loop busy poll.
    pub fn with_queue_polling_rate(self, rate: TimeDelta) -> Self {
        Self {
            queue_polling_rate: Some(rate),
            ..self
        }
    }

    /// A rate of zero makes the promotion loop busy poll.
    pub fn with_schedule_polling_rate(self, rate: TimeDelta) -> Self {
        Self {
            schedule_polling_rate: Some(rate),
            ..self
        }
    }

    pub fn with_wait_polling_rate(self, rate: TimeDelta) -> Self {
        Self {
            wait_polling_rate: Some(rate),
            ..self
        }
    }

    pub fn with_dependency_provider(self, provider: impl DependencyProvider + 'static) -> Self {
        self.with_shared_dependency_provider(Arc::new(provider))
    }

    pub fn with_shared_dependency_provider(self, provider: Arc<dyn DependencyProvider>) -> Self {
        Self {
            dependency_provider: Some(provider),
            ..self
        }
    }

    /// Delays retries by the given strategy instead of re-enqueuing them immediately.
    pub fn with_retry_backoff(self, backoff: impl Strategy + 'static) -> Self {
        Self {
            retry_backoff: Some(Arc::new(backoff)),
            ..self
        }
    }

    pub fn build(self) -> Result<SchedulerConfig, ConfigError> {
        let max_concurrent_jobs = self
            .max_concurrent_jobs
            .unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS);
        if max_concurrent_jobs == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(SchedulerConfig {
            max_concurrent_jobs,
            queue_polling_rate: polling_rate(
                "queue",
                self.queue_polling_rate,
                DEFAULT_QUEUE_POLLING_RATE,
            )?,
            schedule_polling_rate: polling_rate(
                "schedule",
                self.schedule_polling_rate,
                DEFAULT_SCHEDULE_POLLING_RATE,
            )?,
            wait_polling_rate: polling_rate(
                "wait",
                self.wait_polling_rate,
                DEFAULT_WAIT_POLLING_RATE,
            )?,
            dependency_provider: self.dependency_provider,
            retry_backoff: self.retry_backoff,
        })
    }
}

fn polling_rate(
    name: &'static str,
    rate: Option<TimeDelta>,
    default: TimeDelta,
) -> Result<Duration, ConfigError> {
    let rate = rate.unwrap_or(default);
    rate.to_std()
        .map_err(|_| ConfigError::NegativePollingRate { name, rate })
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;
    use crate::{backoff::Backoff, job::instantiator::JobRegistry};

    #[test]
    fn defaults() {
        let config = SchedulerConfig::builder().build().unwrap();

        assert_eq!(config.max_concurrent_jobs(), 5);
        assert_eq!(config.queue_polling_rate(), Duration::from_millis(100));
        assert_eq!(config.schedule_polling_rate(), Duration::from_millis(100));
        assert_eq!(config.wait_polling_rate(), Duration::from_millis(50));
        assert!(config.dependency_provider().is_none());
        assert!(config.retry_backoff().is_none());

        let default = SchedulerConfig::default();
        assert_eq!(default.max_concurrent_jobs(), config.max_concurrent_jobs());
        assert_eq!(default.queue_polling_rate(), config.queue_polling_rate());
    }

    #[test]
    fn overrides() {
        let config = SchedulerConfig::builder()
            .with_max_concurrent_jobs(1)
            .with_queue_polling_rate(TimeDelta::zero())
            .with_schedule_polling_rate(TimeDelta::seconds(1))
            .with_wait_polling_rate(TimeDelta::milliseconds(10))
            .with_dependency_provider(JobRegistry::new())
            .with_retry_backoff(Backoff::constant(TimeDelta::seconds(1)))
            .build()
            .unwrap();

        assert_eq!(config.max_concurrent_jobs(), 1);
        assert_eq!(config.queue_polling_rate(), Duration::ZERO);
        assert_eq!(config.schedule_polling_rate(), Duration::from_secs(1));
        assert_eq!(config.wait_polling_rate(), Duration::from_millis(10));
        assert!(config.dependency_provider().is_some());
        assert!(config.retry_backoff().is_some());
    }

    #[test]
    fn rejects_zero_concurrency() {
        let result = SchedulerConfig::builder()
            .with_max_concurrent_jobs(0)
            .build();
        assert_matches!(result, Err(ConfigError::ZeroConcurrency));
    }

    #[test]
    fn rejects_negative_polling_rates() {
        let result = SchedulerConfig::builder()
            .with_schedule_polling_rate(TimeDelta::milliseconds(-1))
            .build();
        assert_matches!(
            result,
            Err(ConfigError::NegativePollingRate {
                name: "schedule",
                ..
            })
        );

        let result = SchedulerConfig::builder()
            .with_queue_polling_rate(TimeDelta::milliseconds(-1))
            .build();
        assert_matches!(
            result,
            Err(ConfigError::NegativePollingRate { name: "queue", .. })
        );
    }
}
