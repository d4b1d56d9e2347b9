// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Circuit breaker guarding a fast path that may fail repeatedly.
//!
//! Once consecutive failures reach the threshold, every further failure sets
//! `disabled_until = now + min(base * 2^(failures - 1), max)`. While the clock
//! is before that instant the fast path is skipped. A success closes the
//! circuit and resets the failure count.

use std::time::Duration;

use chrono::{DateTime, Utc};
use fairway_core::span;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CircuitState {
    /// Fast path allowed.
    Closed,
    /// Fast path skipped until the cooldown expires.
    Open,
    /// Cooldown expired; the next call tries the fast path.
    HalfOpen,
}

/// Point-in-time view for logging and health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    pub disabled_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    failures: u32,
    disabled_until: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            base_backoff,
            max_backoff,
            failures: 0,
            disabled_until: None,
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> CircuitState {
        match self.disabled_until {
            Some(until) if now < until => CircuitState::Open,
            Some(_) => CircuitState::HalfOpen,
            None => CircuitState::Closed,
        }
    }

    /// Whether the fast path may be attempted at `now`.
    pub fn allows(&self, now: DateTime<Utc>) -> bool {
        self.state(now) != CircuitState::Open
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn disabled_until(&self) -> Option<DateTime<Utc>> {
        self.disabled_until
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.disabled_until = None;
    }

    /// Count a failure and return the new cooldown, if the circuit opened.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.failures < self.failure_threshold {
            return None;
        }
        let window = self.window();
        self.disabled_until = Some(now + span(window));
        Some(window)
    }

    fn window(&self) -> Duration {
        let shift = self.failures.saturating_sub(1).min(20);
        self.base_backoff
            .saturating_mul(1_u32 << shift)
            .min(self.max_backoff)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state(now),
            failures: self.failures,
            disabled_until: self.disabled_until,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60), Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, Duration::from_secs(1), Duration::from_secs(10))
    }

    #[test]
    fn stays_closed_below_threshold() {
        let mut cb = breaker();
        assert_eq!(cb.record_failure(t0()), None);
        assert_eq!(cb.record_failure(t0()), None);
        assert!(cb.allows(t0()));
        assert_eq!(cb.state(t0()), CircuitState::Closed);
    }

    #[test]
    fn opens_at_threshold_with_exponential_window() {
        let mut cb = breaker();
        cb.record_failure(t0());
        cb.record_failure(t0());
        assert_eq!(cb.record_failure(t0()), Some(Duration::from_secs(4)));
        assert!(!cb.allows(t0() + chrono::Duration::seconds(3)));
        assert_eq!(
            cb.state(t0() + chrono::Duration::seconds(4)),
            CircuitState::HalfOpen
        );
        assert!(cb.allows(t0() + chrono::Duration::seconds(4)));
    }

    #[test]
    fn window_is_capped() {
        let mut cb = breaker();
        let mut last = None;
        for _ in 0..8 {
            last = cb.record_failure(t0());
        }
        assert_eq!(last, Some(Duration::from_secs(10)));
    }

    #[test]
    fn success_resets() {
        let mut cb = breaker();
        for _ in 0..3 {
            cb.record_failure(t0());
        }
        cb.record_success();
        let snap = cb.snapshot(t0());
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failures, 0);
        assert_eq!(snap.disabled_until, None);
    }

    #[test]
    fn failed_trial_reopens_with_longer_window() {
        let mut cb = breaker();
        for _ in 0..3 {
            cb.record_failure(t0());
        }
        let later = t0() + chrono::Duration::seconds(5);
        assert_eq!(cb.record_failure(later), Some(Duration::from_secs(8)));
        assert_eq!(cb.state(later), CircuitState::Open);
    }
}
