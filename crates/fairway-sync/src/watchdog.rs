// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stale realtime link detection.
//!
//! A push channel can stay nominally active while delivering nothing, for
//! example after the device slept. [`LinkWatchdog`] decides from the time of
//! the last realtime event whether the link should be restarted and how long
//! to wait first. Consecutive restarts back off; a fresh link resets the count.

use std::time::Duration;

use fairway_config::model::WatchdogConfig;
use fairway_core::Timestamp;
use fairway_resilience::BackoffPolicy;
use rand::Rng;

/// Restart scheduling for one controller's realtime links.
#[derive(Debug)]
pub struct LinkWatchdog {
    stale_after: Duration,
    policy: BackoffPolicy,
    jitter_ms: u64,
    restarts: u32,
}

impl LinkWatchdog {
    /// Watchdog with no restarts counted yet.
    pub fn new(config: &WatchdogConfig) -> Self {
        Self {
            stale_after: config.stale_after(),
            policy: BackoffPolicy::new(u32::MAX, config.restart_base(), config.restart_max()),
            jitter_ms: config.jitter_ms,
            restarts: 0,
        }
    }

    /// Check the link at `now`.
    ///
    /// Returns the delay before a restart when the last realtime event is
    /// older than the stale threshold, without jitter. A link that never
    /// delivered anything is not judged.
    pub fn check(&mut self, now: Timestamp, last_event: Option<Timestamp>) -> Option<Duration> {
        let last_event = last_event?;
        let silent = (now - last_event).to_std().unwrap_or(Duration::ZERO);
        if silent <= self.stale_after {
            self.restarts = 0;
            return None;
        }
        let delay = self.policy.delay_for_attempt(self.restarts);
        self.restarts = self.restarts.saturating_add(1);
        Some(delay)
    }

    /// Random spread added to a restart delay.
    pub fn jitter(&self) -> Duration {
        if self.jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
    }

    /// Restarts since the link was last seen fresh.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }
}
