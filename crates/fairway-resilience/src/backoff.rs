// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exponential backoff schedule.

use std::time::Duration;

/// Retry schedule for push channel (re)subscription.
///
/// `max_attempts` counts retries after the initial attempt, so a policy with
/// `max_attempts = 5` makes at most six calls and sleeps five times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
        }
    }

    /// Delay before retry number `retry` (zero-based): `initial * 2^retry`, capped.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let shift = retry.min(20);
        let initial_ms = u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(initial_ms.saturating_mul(1_u64 << shift).min(max_ms))
    }

    /// The full sleep schedule a run that never succeeds would follow.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts)
            .map(|retry| self.delay_for_attempt(retry))
            .collect()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(500), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn starts_with_initial_delay() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
    }

    #[test]
    fn default_schedule_doubles() {
        let expected: Vec<Duration> = [500, 1000, 2000, 4000, 8000]
            .into_iter()
            .map(Duration::from_millis)
            .collect();
        assert_eq!(BackoffPolicy::default().schedule(), expected);
    }

    #[test]
    fn caps_at_ceiling() {
        let policy = BackoffPolicy::new(10, Duration::from_secs(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_secs(4));
    }

    #[test]
    fn huge_retry_numbers_do_not_overflow() {
        let policy = BackoffPolicy::new(u32::MAX, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    proptest! {
        #[test]
        fn schedule_is_monotonic_and_bounded(
            attempts in 0u32..40,
            initial in 1u64..5_000,
            ceiling in 1u64..120_000,
        ) {
            let policy = BackoffPolicy::new(
                attempts,
                Duration::from_millis(initial),
                Duration::from_millis(initial.max(ceiling)),
            );
            let schedule = policy.schedule();
            prop_assert_eq!(schedule.len(), attempts as usize);
            for pair in schedule.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
            for delay in &schedule {
                prop_assert!(*delay <= policy.max_delay);
            }
        }
    }
}
