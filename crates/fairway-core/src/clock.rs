// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Injectable time source.
//!
//! Every timer in the engine (backoff delays, backfill throttles, cache TTLs,
//! send intervals, polling ticks) reads time through [`Clock`] so tests can
//! drive it deterministically with [`ManualClock`].

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

/// Convert a std duration for timestamp arithmetic, saturating at a century.
pub fn span(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Source of wall-clock time and delays.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by the system time and the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

/// Deterministic clock for tests.
///
/// In auto-advance mode (`new`) every `sleep` records its duration, moves time
/// forward by it and returns after one scheduler yield. In paused mode
/// (`paused`) a sleeper stays blocked until [`ManualClock::advance`] moves time
/// past its deadline.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
    auto_advance: bool,
    wake: Notify,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::with_mode(start, true)
    }

    pub fn paused(start: DateTime<Utc>) -> Self {
        Self::with_mode(start, false)
    }

    fn with_mode(start: DateTime<Utc>, auto_advance: bool) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                sleeps: Vec::new(),
            }),
            auto_advance,
            wake: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move time forward and wake sleepers whose deadline has passed.
    pub fn advance(&self, by: Duration) {
        {
            let mut state = self.lock();
            state.now += span(by);
        }
        self.wake.notify_waiters();
    }

    /// Jump to an absolute time. Moving backwards is allowed.
    pub fn set(&self, now: DateTime<Utc>) {
        self.lock().now = now;
        self.wake.notify_waiters();
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = {
            let mut state = self.lock();
            state.sleeps.push(duration);
            let deadline = state.now + span(duration);
            if self.auto_advance && state.now < deadline {
                state.now = deadline;
            }
            deadline
        };

        if self.auto_advance {
            tokio::task::yield_now().await;
            return;
        }

        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.now() >= deadline {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[tokio::test]
    async fn auto_clock_records_and_advances() {
        let clock = ManualClock::new(epoch());
        clock.sleep(Duration::from_millis(500)).await;
        clock.sleep(Duration::from_secs(1)).await;
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(500), Duration::from_secs(1)]
        );
        assert_eq!(clock.now(), epoch() + chrono::Duration::milliseconds(1500));
    }

    #[tokio::test]
    async fn paused_clock_blocks_until_advanced() {
        let clock = Arc::new(ManualClock::paused(epoch()));
        let sleeper = {
            let clock = Arc::clone(&clock);
            tokio::spawn(async move { clock.sleep(Duration::from_secs(10)).await })
        };

        tokio::task::yield_now().await;
        clock.advance(Duration::from_secs(5));
        tokio::task::yield_now().await;
        assert!(!sleeper.is_finished());

        clock.advance(Duration::from_secs(5));
        sleeper.await.unwrap();
        assert_eq!(clock.now(), epoch() + chrono::Duration::seconds(10));
    }

    #[test]
    fn set_can_move_backwards() {
        let clock = ManualClock::new(epoch());
        clock.set(epoch() - chrono::Duration::seconds(1));
        assert!(clock.now() < epoch());
    }
}
