//! Delays applied before retrying a failed job.
//!
//! By default a failed job is retried immediately. Passing a [`Strategy`] to
//! [`crate::config::SchedulerConfigBuilder::with_retry_backoff`] makes every retry wait in the
//! schedule queue for the computed delay instead.
//!
//! # Example
//!
//! ```
//! # use hopper::prelude::*;
//! # use chrono::TimeDelta;
//! let backoff = Backoff::exponential(TimeDelta::seconds(1))
//!     .with_max(TimeDelta::seconds(30))
//!     .with_jitter(Jitter::Absolute(TimeDelta::milliseconds(200)));
//!
//! assert!(backoff.backoff(3) >= TimeDelta::milliseconds(3800));
//! assert!(backoff.backoff(3) <= TimeDelta::milliseconds(4200));
//! assert!(backoff.backoff(20) <= TimeDelta::milliseconds(30200));
//! ```
use chrono::TimeDelta;
use rand::Rng;

/// Computes the delay before a retry.
pub trait Strategy: Send + Sync {
    /// The delay before the `retry`th retry, counting from 1.
    fn backoff(&self, retry: u32) -> TimeDelta;
}

impl<F> Strategy for F
where
    F: Fn(u32) -> TimeDelta + Send + Sync,
{
    fn backoff(&self, retry: u32) -> TimeDelta {
        self(retry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Growth {
    Constant,
    Linear,
    Exponential,
}

/// A random jitter applied on top of a backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// Adds a random delta in `-delta..=delta`.
    Absolute(TimeDelta),
    /// Adds a random delta proportional to the backoff, e.g. `0.1` for up to ±10%.
    Relative(f64),
}

impl Jitter {
    fn apply(&self, value: TimeDelta) -> TimeDelta {
        let spread = match self {
            Self::Absolute(delta) => delta.num_milliseconds().abs(),
            Self::Relative(ratio) => (value.num_milliseconds() as f64 * ratio.abs()).round() as i64,
        };
        if spread == 0 {
            return value;
        }
        let jitter = rand::thread_rng().gen_range(-spread..=spread);
        value + TimeDelta::milliseconds(jitter)
    }
}

/// The bundled [`Strategy`]: a constant, linear or exponential delay, optionally capped and
/// jittered. The result is never negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: TimeDelta,
    growth: Growth,
    max: Option<TimeDelta>,
    jitter: Option<Jitter>,
}

impl Backoff {
    const fn new(base: TimeDelta, growth: Growth) -> Self {
        Self {
            base,
            growth,
            max: None,
            jitter: None,
        }
    }

    /// Waits `delay` before every retry.
    pub const fn constant(delay: TimeDelta) -> Self {
        Self::new(delay, Growth::Constant)
    }

    /// Waits `step * retry`.
    pub const fn linear(step: TimeDelta) -> Self {
        Self::new(step, Growth::Linear)
    }

    /// Waits `base`, then doubles with every retry.
    pub const fn exponential(base: TimeDelta) -> Self {
        Self::new(base, Growth::Exponential)
    }

    /// Caps the delay before jitter is applied.
    pub const fn with_max(mut self, max: TimeDelta) -> Self {
        self.max = Some(max);
        self
    }

    pub const fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Some(jitter);
        self
    }

    fn grow(&self, retry: u32) -> TimeDelta {
        let retry = retry.max(1);
        let factor = match self.growth {
            Growth::Constant => 1,
            Growth::Linear => i32::try_from(retry).unwrap_or(i32::MAX),
            Growth::Exponential => 2_i32.checked_pow(retry - 1).unwrap_or(i32::MAX),
        };
        self.base
            .checked_mul(factor)
            .unwrap_or(TimeDelta::max_value())
    }
}

impl Strategy for Backoff {
    fn backoff(&self, retry: u32) -> TimeDelta {
        let mut backoff = self.grow(retry);
        if let Some(max) = self.max {
            backoff = backoff.min(max);
        }
        if let Some(jitter) = self.jitter {
            backoff = jitter.apply(backoff);
        }
        backoff.max(TimeDelta::zero())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn constant_backoff() {
        let delay = TimeDelta::seconds(5);
        let strategy = Backoff::constant(delay);

        for retry in 1..50 {
            assert_eq!(strategy.backoff(retry), delay);
        }
    }

    #[test]
    fn linear_backoff_with_max() {
        let strategy = Backoff::linear(TimeDelta::seconds(10)).with_max(TimeDelta::seconds(25));

        assert_eq!(strategy.backoff(1), TimeDelta::seconds(10));
        assert_eq!(strategy.backoff(2), TimeDelta::seconds(20));
        assert_eq!(strategy.backoff(3), TimeDelta::seconds(25));
        assert_eq!(strategy.backoff(300), TimeDelta::seconds(25));
    }

    #[test]
    fn exponential_backoff_doubles() {
        let strategy = Backoff::exponential(TimeDelta::milliseconds(100));

        assert_eq!(strategy.backoff(1), TimeDelta::milliseconds(100));
        assert_eq!(strategy.backoff(2), TimeDelta::milliseconds(200));
        assert_eq!(strategy.backoff(3), TimeDelta::milliseconds(400));
        assert_eq!(strategy.backoff(4), TimeDelta::milliseconds(800));
    }

    #[test]
    fn exponential_backoff_saturates() {
        let max = TimeDelta::hours(1);
        let strategy = Backoff::exponential(TimeDelta::seconds(1)).with_max(max);

        assert_eq!(strategy.backoff(64), max);
        assert_eq!(strategy.backoff(u32::MAX), max);
    }

    #[test]
    fn retry_zero_is_treated_as_first() {
        let strategy = Backoff::linear(TimeDelta::seconds(1));
        assert_eq!(strategy.backoff(0), TimeDelta::seconds(1));
    }

    #[test]
    fn absolute_jitter_stays_in_range() {
        let delay = TimeDelta::seconds(10);
        let jitter = TimeDelta::seconds(2);
        let strategy = Backoff::constant(delay).with_jitter(Jitter::Absolute(jitter));

        for retry in 1..100 {
            let backoff = strategy.backoff(retry);
            assert!(backoff >= delay - jitter);
            assert!(backoff <= delay + jitter);
        }
    }

    #[test]
    fn relative_jitter_stays_in_range() {
        let delay = TimeDelta::seconds(10);
        let strategy = Backoff::constant(delay).with_jitter(Jitter::Relative(0.1));

        for retry in 1..100 {
            let backoff = strategy.backoff(retry);
            assert!(backoff >= TimeDelta::seconds(9));
            assert!(backoff <= TimeDelta::seconds(11));
        }
    }

    #[test]
    fn jitter_never_goes_negative() {
        let strategy = Backoff::constant(TimeDelta::milliseconds(1))
            .with_jitter(Jitter::Absolute(TimeDelta::seconds(5)));

        for retry in 1..100 {
            assert!(strategy.backoff(retry) >= TimeDelta::zero());
        }
    }

    #[test]
    fn closures_are_strategies() {
        let strategy = |retry: u32| TimeDelta::seconds(retry.into());
        assert_eq!(strategy.backoff(4), TimeDelta::seconds(4));
    }
}
