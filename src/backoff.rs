//! Reconnect delay schedule.
//!
//! [`Backoff`] is pure: given a 1-based attempt number it returns how long to
//! wait before that attempt, or `None` once the attempt budget is spent.
//!
//! ```text
//! delay(n) = min(max, base * 2^(n-1))
//! ```
//!
//! With the defaults (500 ms base, 30 s cap, 5 attempts) the schedule is
//! 500, 1000, 2000, 4000, 8000 ms.

use std::time::Duration;

/// Default delay before the first retry.
pub const DEFAULT_BASE: Duration = Duration::from_millis(500);
/// Upper bound on any single delay.
pub const DEFAULT_MAX: Duration = Duration::from_millis(30_000);
/// Retries allowed before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Bounded exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_MAX, DEFAULT_MAX_ATTEMPTS)
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay for `attempt` (1-based) ignoring the attempt budget.
    ///
    /// Attempt 0 is treated as attempt 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        // 2^31 * base already dwarfs any sane cap; avoid shift overflow.
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay for `attempt`, or `None` when it exceeds the budget.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_attempts {
            None
        } else {
            Some(self.delay(attempt))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_matches_formula() {
        let backoff = Backoff::default();
        for attempt in 1..=5u32 {
            let expected = 30_000u64.min(500 * 2u64.pow(attempt - 1));
            assert_eq!(
                backoff.delay(attempt),
                Duration::from_millis(expected),
                "attempt {attempt}"
            );
        }
    }

    #[test]
    fn default_schedule_values() {
        let backoff = Backoff::default();
        let delays: Vec<u128> = (1..=5).map(|n| backoff.delay(n).as_millis()).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000]);
    }

    #[test]
    fn delay_is_capped() {
        let backoff = Backoff::new(DEFAULT_BASE, DEFAULT_MAX, 20);
        assert_eq!(backoff.delay(7), Duration::from_millis(30_000));
        assert_eq!(backoff.delay(20), Duration::from_millis(30_000));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn budget_is_enforced() {
        let backoff = Backoff::default();
        assert_eq!(backoff.next_delay(5), Some(Duration::from_millis(8000)));
        assert_eq!(backoff.next_delay(6), None);
    }

    #[test]
    fn attempt_zero_behaves_like_first() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), backoff.delay(1));
    }
}
