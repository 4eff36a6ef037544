//! Retry/backoff policy for upstream connection attempts.
//!
//! A pure decision function: given the class of the last failure and how
//! many attempts have been made, decide whether to go again and after what
//! delay. The caller performs the wait.

use std::time::Duration;

use crate::error::ErrorClass;

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    pub fn give_up() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
        }
    }

    pub fn after(delay: Duration) -> Self {
        Self { retry: true, delay }
    }
}

/// Exponential backoff limited to Transient failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included.
    pub ceiling: u32,
    /// Delay after the first failed attempt; doubles after each further one.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            ceiling: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(ceiling: u32, base_delay: Duration) -> Self {
        Self {
            ceiling,
            base_delay,
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Decide whether to re-issue after `attempt_number` attempts have failed
    /// (1 for the first attempt).
    pub fn should_retry(&self, class: ErrorClass, attempt_number: u32) -> RetryDecision {
        match class {
            ErrorClass::Transient if attempt_number < self.ceiling => {
                RetryDecision::after(self.delay_for(attempt_number))
            }
            ErrorClass::Transient | ErrorClass::Timeout | ErrorClass::Fatal => {
                RetryDecision::give_up()
            }
        }
    }

    /// `base_delay * 2^(attempt_number - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt_number.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}
