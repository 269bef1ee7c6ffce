//! Backoff schedules between transaction attempts.
//!
//! Attempt index `0` is the initial call and never waits; the wait before retry `n` is
//! `delay(n)`. Callers that count failed attempts from zero use [`Backoff::delay_after`], which
//! for the exponential schedule yields `base * 2^i` after failed attempt `i`.
//!
//! ```rust
//! use std::time::Duration;
//! use batchline::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100));
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay_after(0), Duration::from_millis(100));
//! assert_eq!(backoff.delay_after(1), Duration::from_millis(200));
//! ```
//!
//! Computations that would overflow saturate to [`MAX_BACKOFF`].

use std::time::Duration;

/// Upper bound for any computed delay (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Invalid backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("with_max is only valid for linear or exponential backoff")]
    ConstantDoesNotSupportMax,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    Constant,
    Linear,
    Exponential,
}

/// Delay schedule applied between a retryable failure and the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    schedule: Schedule,
    base: Duration,
    max: Option<Duration>,
}

impl Backoff {
    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { schedule: Schedule::Constant, base: delay, max: None }
    }

    /// `base * n` before retry `n`.
    pub fn linear(base: Duration) -> Self {
        Self { schedule: Schedule::Linear, base, max: None }
    }

    /// `base * 2^(n-1)` before retry `n`.
    pub fn exponential(base: Duration) -> Self {
        Self { schedule: Schedule::Exponential, base, max: None }
    }

    /// Cap linear or exponential growth at `max`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        if self.schedule == Schedule::Constant {
            return Err(BackoffError::ConstantDoesNotSupportMax);
        }
        if max < self.base {
            return Err(BackoffError::MaxLessThanBase { base: self.base, max });
        }
        self.max = Some(max);
        Ok(self)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Option<Duration> {
        self.max
    }

    /// Delay before attempt `attempt` (0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let raw = match self.schedule {
            Schedule::Constant => self.base,
            Schedule::Linear => {
                let factor = attempt.min(u32::MAX as usize) as u32;
                self.base.checked_mul(factor).unwrap_or(MAX_BACKOFF)
            }
            Schedule::Exponential => {
                let exponent = (attempt - 1).min(u32::MAX as usize) as u32;
                let nanos = self.base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
                Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64)
            }
        };
        let capped = self.max.map(|m| raw.min(m)).unwrap_or(raw);
        capped.min(MAX_BACKOFF)
    }

    /// Delay following the failure of 0-based attempt `failed_attempt`.
    pub fn delay_after(&self, failed_attempt: usize) -> Duration {
        self.delay(failed_attempt.saturating_add(1))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_attempt_never_waits() {
        for backoff in [
            Backoff::constant(Duration::from_millis(50)),
            Backoff::linear(Duration::from_millis(50)),
            Backoff::exponential(Duration::from_millis(50)),
        ] {
            assert_eq!(backoff.delay(0), Duration::ZERO);
        }
    }

    #[test]
    fn exponential_doubles_from_base() {
        let backoff = Backoff::exponential(Duration::from_millis(100));
        assert_eq!(backoff.delay_after(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_after(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_after(2), Duration::from_millis(400));
        assert_eq!(backoff.delay_after(4), Duration::from_millis(1600));
    }

    #[test]
    fn default_is_exponential_100ms() {
        let backoff = Backoff::default();
        assert_eq!(backoff.base(), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
    }

    #[test]
    fn linear_and_constant_schedules() {
        let linear = Backoff::linear(Duration::from_millis(100));
        assert_eq!(linear.delay(3), Duration::from_millis(300));

        let constant = Backoff::constant(Duration::from_secs(1));
        assert_eq!(constant.delay(1), Duration::from_secs(1));
        assert_eq!(constant.delay(100), Duration::from_secs(1));
    }

    #[test]
    fn cap_applies_to_growth() {
        let backoff = Backoff::exponential(Duration::from_millis(100))
            .with_max(Duration::from_secs(1))
            .unwrap();
        assert_eq!(backoff.delay(4), Duration::from_millis(800));
        assert_eq!(backoff.delay(5), Duration::from_secs(1));
        assert_eq!(backoff.delay(50), Duration::from_secs(1));
    }

    #[test]
    fn invalid_caps_are_rejected() {
        assert_eq!(
            Backoff::constant(Duration::from_secs(1)).with_max(Duration::from_secs(2)),
            Err(BackoffError::ConstantDoesNotSupportMax)
        );
        assert_eq!(
            Backoff::linear(Duration::from_secs(1)).with_max(Duration::ZERO),
            Err(BackoffError::MaxMustBePositive)
        );
        assert!(matches!(
            Backoff::exponential(Duration::from_secs(5)).with_max(Duration::from_secs(1)),
            Err(BackoffError::MaxLessThanBase { .. })
        ));
    }

    #[test]
    fn huge_attempts_saturate() {
        assert_eq!(Backoff::exponential(Duration::from_secs(1)).delay(1_000_000_000), MAX_BACKOFF);
        assert_eq!(Backoff::linear(Duration::from_secs(u64::MAX / 2)).delay(1_000), MAX_BACKOFF);
        assert_eq!(Backoff::exponential(Duration::from_secs(1)).delay_after(usize::MAX), MAX_BACKOFF);
    }
}
