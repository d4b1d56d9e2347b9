// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconnection coordinator.
//!
//! [`ReconnectMachine`] is the explicit `Idle -> Connecting -> Active ->
//! Backoff(n) -> Failed` state machine; [`with_retry`] drives it with an
//! injected [`Clock`]. State lives on the caller's stack, so independent
//! subscriptions can retry concurrently without sharing anything.

use std::future::Future;
use std::time::Duration;

use fairway_core::{Clock, FairwayError};
use strum::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ReconnectState {
    Idle,
    /// Attempt 0 is the initial subscribe, later ones are retries.
    Connecting { attempt: u32 },
    Active,
    /// Waiting `delay` before retry number `retry + 1`.
    Backoff { retry: u32, delay: Duration },
    Failed,
}

#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    policy: BackoffPolicy,
    state: ReconnectState,
}

impl ReconnectMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: ReconnectState::Idle,
        }
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    pub fn start(&mut self) -> Result<ReconnectState, FairwayError> {
        match self.state {
            ReconnectState::Idle => self.set(ReconnectState::Connecting { attempt: 0 }),
            other => Err(invalid(other, "start")),
        }
    }

    pub fn succeeded(&mut self) -> Result<ReconnectState, FairwayError> {
        match self.state {
            ReconnectState::Connecting { .. } => self.set(ReconnectState::Active),
            other => Err(invalid(other, "succeeded")),
        }
    }

    /// Record a failed attempt. Moves to `Backoff` while retries remain, else `Failed`.
    pub fn failed(&mut self) -> Result<ReconnectState, FairwayError> {
        match self.state {
            ReconnectState::Connecting { attempt } if attempt < self.policy.max_attempts => {
                self.set(ReconnectState::Backoff {
                    retry: attempt,
                    delay: self.policy.delay_for_attempt(attempt),
                })
            }
            ReconnectState::Connecting { .. } => self.set(ReconnectState::Failed),
            other => Err(invalid(other, "failed")),
        }
    }

    /// Abort from any state.
    pub fn give_up(&mut self) -> ReconnectState {
        self.state = ReconnectState::Failed;
        self.state
    }

    pub fn retry(&mut self) -> Result<ReconnectState, FairwayError> {
        match self.state {
            ReconnectState::Backoff { retry, .. } => self.set(ReconnectState::Connecting {
                attempt: retry + 1,
            }),
            other => Err(invalid(other, "retry")),
        }
    }

    fn set(&mut self, next: ReconnectState) -> Result<ReconnectState, FairwayError> {
        self.state = next;
        Ok(next)
    }
}

fn invalid(state: ReconnectState, action: &str) -> FairwayError {
    FairwayError::Internal(format!("cannot {action} while reconnect state is {state}"))
}

/// Invoke `subscribe_fn` until it succeeds, retrying with exponential backoff.
///
/// `subscribe_fn` receives the attempt number (0 for the first call).
/// `observe` sees every state transition, which the subscription manager uses
/// to publish connectivity changes. Non-transient errors are returned at once.
/// Cancelling `cancel` aborts both an in-flight attempt and a pending backoff
/// with [`FairwayError::Cancelled`].
pub async fn with_retry<T, F, Fut>(
    policy: &BackoffPolicy,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    mut observe: impl FnMut(&ReconnectState),
    mut subscribe_fn: F,
) -> Result<T, FairwayError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FairwayError>>,
{
    let mut machine = ReconnectMachine::new(*policy);
    observe(&machine.start()?);

    loop {
        let attempt = match machine.state() {
            ReconnectState::Connecting { attempt } => attempt,
            other => return Err(invalid(other, "attempt")),
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FairwayError::Cancelled),
            result = subscribe_fn(attempt) => result,
        };

        let err = match outcome {
            Ok(value) => {
                observe(&machine.succeeded()?);
                return Ok(value);
            }
            Err(FairwayError::Cancelled) => {
                observe(&machine.give_up());
                return Err(FairwayError::Cancelled);
            }
            Err(err) if !err.is_transient() => {
                observe(&machine.give_up());
                return Err(err);
            }
            Err(err) => err,
        };

        match machine.failed()? {
            ReconnectState::Backoff { retry, delay } => {
                warn!(attempt, retry = retry + 1, delay_ms = delay.as_millis() as u64, error = %err, "subscribe failed, backing off");
                observe(&machine.state());
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("backoff cancelled");
                        observe(&machine.give_up());
                        return Err(FairwayError::Cancelled);
                    }
                    _ = clock.sleep(delay) => {}
                }
                observe(&machine.retry()?);
            }
            state => {
                warn!(attempts = policy.max_attempts, error = %err, "subscribe retries exhausted");
                observe(&state);
                return Err(FairwayError::RetriesExhausted {
                    attempts: policy.max_attempts,
                    last_error: err.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use fairway_core::ManualClock;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;

    fn clock() -> ManualClock {
        ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap())
    }

    fn flaky(fail_times: u32, calls: Arc<AtomicU32>) -> impl FnMut(u32) -> std::future::Ready<Result<&'static str, FairwayError>> {
        move |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < fail_times {
                Err(FairwayError::channel("room:1", "CHANNEL_ERROR"))
            } else {
                Ok("active")
            })
        }
    }

    #[test]
    fn machine_walks_happy_path() {
        let mut m = ReconnectMachine::new(BackoffPolicy::default());
        assert_eq!(m.start().unwrap(), ReconnectState::Connecting { attempt: 0 });
        assert_eq!(
            m.failed().unwrap(),
            ReconnectState::Backoff {
                retry: 0,
                delay: Duration::from_millis(500)
            }
        );
        assert_eq!(m.retry().unwrap(), ReconnectState::Connecting { attempt: 1 });
        assert_eq!(m.succeeded().unwrap(), ReconnectState::Active);
    }

    #[test]
    fn machine_rejects_invalid_transitions() {
        let mut m = ReconnectMachine::new(BackoffPolicy::default());
        assert!(m.retry().is_err());
        assert!(m.succeeded().is_err());
        m.start().unwrap();
        assert!(m.start().is_err());
    }

    #[test]
    fn machine_fails_after_last_retry() {
        let mut m = ReconnectMachine::new(BackoffPolicy::new(1, Duration::from_millis(10), Duration::from_secs(1)));
        m.start().unwrap();
        m.failed().unwrap();
        m.retry().unwrap();
        assert_eq!(m.failed().unwrap(), ReconnectState::Failed);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts_with_doubling_delays() {
        let clock = clock();
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let policy = BackoffPolicy::new(5, Duration::from_millis(500), Duration::from_millis(30_000));

        let err = with_retry(&policy, &clock, &cancel, |_| {}, flaky(u32::MAX, calls.clone()))
            .await
            .unwrap_err();

        assert!(matches!(err, FairwayError::RetriesExhausted { attempts: 5, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        let expected: Vec<Duration> = [500, 1000, 2000, 4000, 8000]
            .into_iter()
            .map(Duration::from_millis)
            .collect();
        assert_eq!(clock.sleeps(), expected);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let clock = clock();
        let calls = Arc::new(AtomicU32::new(0));
        let mut states = Vec::new();

        let value = with_retry(
            &BackoffPolicy::default(),
            &clock,
            &CancellationToken::new(),
            |s| states.push(*s),
            flaky(2, calls.clone()),
        )
        .await
        .unwrap();

        assert_eq!(value, "active");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(clock.sleeps().len(), 2);
        assert_eq!(states.first(), Some(&ReconnectState::Connecting { attempt: 0 }));
        assert_eq!(states.last(), Some(&ReconnectState::Active));
        assert!(states.contains(&ReconnectState::Connecting { attempt: 2 }));
    }

    #[tokio::test]
    async fn non_transient_error_is_not_retried() {
        let clock = clock();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = with_retry(
            &BackoffPolicy::default(),
            &clock,
            &CancellationToken::new(),
            |_| {},
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Err::<(), _>(FairwayError::NotAuthenticated))
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FairwayError::NotAuthenticated));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn cancel_during_backoff_aborts() {
        let clock = Arc::new(ManualClock::paused(DateTime::from_timestamp(0, 0).unwrap()));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let task = {
            let clock = Arc::clone(&clock);
            let cancel = cancel.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                with_retry(
                    &BackoffPolicy::default(),
                    clock.as_ref(),
                    &cancel,
                    |_| {},
                    flaky(u32::MAX, calls),
                )
                .await
            })
        };

        while clock.sleeps().is_empty() {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, FairwayError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn logs_each_backoff() {
        let clock = clock();
        let _ = with_retry(
            &BackoffPolicy::new(1, Duration::from_millis(5), Duration::from_millis(5)),
            &clock,
            &CancellationToken::new(),
            |_| {},
            flaky(u32::MAX, Arc::new(AtomicU32::new(0))),
        )
        .await;
        assert!(logs_contain("subscribe failed, backing off"));
        assert!(logs_contain("subscribe retries exhausted"));
    }
}
