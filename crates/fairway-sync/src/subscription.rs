// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Push channel lifecycle per scope.
//!
//! Each open scope owns one background task. The task subscribes through
//! [`with_retry`], waits for the channel to confirm `active`, then pumps
//! inbound events into the controller's sink until the channel fails (and is
//! re-established) or the scope is closed. Concurrent `open` calls for the same
//! scope share the task and its outcome.
//!
//! Events that arrive before a channel confirms are held back and forwarded
//! after the `Reconnected` signal, so the gap backfill starts from the
//! watermark the channel dropped at.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use fairway_config::model::ReconnectConfig;
use fairway_core::{
    ChannelScope, ChannelSignal, Clock, ConnectivityState, FairwayError, MessageEvent,
    MessageStore, PushChannel,
};
use fairway_resilience::{BackoffPolicy, ReconnectState, with_retry};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the subscription tasks report to the controller.
#[derive(Debug)]
pub enum SyncSignal {
    /// An insert or update delivered by a push channel.
    Inbound {
        scope: ChannelScope,
        event: MessageEvent,
    },
    Connectivity {
        scope: ChannelScope,
        state: ConnectivityState,
    },
    /// A channel came back after dropping; the gap needs a backfill.
    Reconnected { scope: ChannelScope },
    /// Retries are exhausted; the scope needs the polling fallback.
    ChannelFailed { scope: ChannelScope, error: String },
    /// Acknowledged once every signal queued before it has been handled.
    Flush(oneshot::Sender<()>),
}

/// Terminal or current result of a scope's subscribe attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Active,
    Exhausted { attempts: u32, last_error: String },
    Rejected(String),
    Cancelled,
}

impl Outcome {
    fn from_error(err: &FairwayError) -> Self {
        match err {
            FairwayError::RetriesExhausted {
                attempts,
                last_error,
            } => Outcome::Exhausted {
                attempts: *attempts,
                last_error: last_error.clone(),
            },
            FairwayError::Cancelled => Outcome::Cancelled,
            other => Outcome::Rejected(other.to_string()),
        }
    }

    fn into_result(self, scope: &ChannelScope) -> Result<(), FairwayError> {
        match self {
            Outcome::Active => Ok(()),
            Outcome::Exhausted {
                attempts,
                last_error,
            } => Err(FairwayError::RetriesExhausted {
                attempts,
                last_error,
            }),
            Outcome::Rejected(message) => Err(FairwayError::channel(scope, message)),
            Outcome::Cancelled => Err(FairwayError::Cancelled),
        }
    }
}

struct Slot {
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<Outcome>>,
    state: watch::Receiver<ConnectivityState>,
    task: JoinHandle<()>,
}

struct Inner {
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
    policy: BackoffPolicy,
    subscribe_timeout: Duration,
    sink: mpsc::UnboundedSender<SyncSignal>,
    shutdown: CancellationToken,
    slots: Mutex<HashMap<ChannelScope, Slot>>,
}

/// Owns at most one live push channel per scope.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    /// `shutdown` is the parent of every per-scope cancellation token.
    pub fn new(
        store: Arc<dyn MessageStore>,
        clock: Arc<dyn Clock>,
        config: &ReconnectConfig,
        sink: mpsc::UnboundedSender<SyncSignal>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                policy: BackoffPolicy::new(
                    config.max_attempts,
                    config.initial_delay(),
                    config.max_delay(),
                ),
                subscribe_timeout: config.subscribe_timeout(),
                sink,
                shutdown,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Ensure `scope` has a live channel.
    ///
    /// Resolves once the channel is active, or with the terminal error of the
    /// retry loop. A scope whose earlier task already failed is started afresh.
    pub async fn open(&self, scope: &ChannelScope) -> Result<(), FairwayError> {
        let mut outcome = {
            let mut slots = self.inner.lock();
            match slots.get(scope) {
                Some(slot) if !slot.task.is_finished() => slot.outcome.clone(),
                _ => {
                    let slot = self.inner.spawn(scope.clone());
                    let outcome = slot.outcome.clone();
                    slots.insert(scope.clone(), slot);
                    outcome
                }
            }
        };

        let resolved = outcome
            .wait_for(Option::is_some)
            .await
            .map(|o| o.clone())
            .ok()
            .flatten();
        match resolved {
            Some(outcome) => outcome.into_result(scope),
            None => Err(FairwayError::Cancelled),
        }
    }

    /// Tear down the channel for `scope`, cancelling any pending backoff.
    pub async fn close(&self, scope: &ChannelScope) {
        let slot = self.inner.lock().remove(scope);
        if let Some(slot) = slot {
            slot.cancel.cancel();
            if let Err(e) = slot.task.await {
                warn!(%scope, error = %e, "subscription task ended abnormally");
            }
            debug!(%scope, "subscription closed");
        }
    }

    /// Tear down every channel and wait for the tasks to finish.
    pub async fn close_all(&self) {
        let slots: Vec<(ChannelScope, Slot)> = self.inner.lock().drain().collect();
        for (_, slot) in &slots {
            slot.cancel.cancel();
        }
        let tasks = slots.into_iter().map(|(_, slot)| slot.task);
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "subscription task ended abnormally");
            }
        }
    }

    /// Current connectivity of `scope`, if it has a task.
    pub fn state(&self, scope: &ChannelScope) -> Option<ConnectivityState> {
        self.inner.lock().get(scope).map(|slot| *slot.state.borrow())
    }

    #[cfg(test)]
    fn scopes(&self) -> Vec<ChannelScope> {
        self.inner.lock().keys().cloned().collect()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelScope, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn(self: &Arc<Self>, scope: ChannelScope) -> Slot {
        let cancel = self.shutdown.child_token();
        let (outcome_tx, outcome) = watch::channel(None);
        let (state_tx, state) = watch::channel(ConnectivityState::Closed);
        let emitter = Emitter {
            scope: scope.clone(),
            sink: self.sink.clone(),
            state: state_tx,
        };
        let task = tokio::spawn(Arc::clone(self).run(emitter, cancel.clone(), outcome_tx));
        Slot {
            cancel,
            outcome,
            state,
            task,
        }
    }

    async fn run(
        self: Arc<Self>,
        emitter: Emitter,
        cancel: CancellationToken,
        outcome: watch::Sender<Option<Outcome>>,
    ) {
        let scope = emitter.scope.clone();
        let mut reconnecting = false;

        loop {
            let connected = {
                let this: &Inner = &self;
                let emitter_ref = &emitter;
                with_retry(
                    &self.policy,
                    self.clock.as_ref(),
                    &cancel,
                    |state| emitter_ref.observe(state),
                    move |attempt| this.connect(emitter_ref, attempt),
                )
                .await
            };

            let (mut channel, early) = match connected {
                Ok(connected) => connected,
                Err(FairwayError::Cancelled) => {
                    emitter.emit(ConnectivityState::Closed);
                    outcome.send_replace(Some(Outcome::Cancelled));
                    return;
                }
                Err(err) => {
                    warn!(%scope, error = %err, "push channel failed");
                    emitter.emit(ConnectivityState::Closed);
                    outcome.send_replace(Some(Outcome::from_error(&err)));
                    emitter.signal(SyncSignal::ChannelFailed {
                        scope: scope.clone(),
                        error: err.to_string(),
                    });
                    return;
                }
            };

            emitter.emit(ConnectivityState::Active);
            outcome.send_replace(Some(Outcome::Active));
            if reconnecting {
                info!(%scope, "push channel restored");
                emitter.signal(SyncSignal::Reconnected {
                    scope: scope.clone(),
                });
            } else {
                info!(%scope, "push channel active");
            }
            for event in early {
                emitter.forward(event);
            }

            match pump(&mut channel, &cancel, &emitter).await {
                None => {
                    emitter.emit(ConnectivityState::Closed);
                    outcome.send_replace(Some(Outcome::Cancelled));
                    return;
                }
                Some(reason) => {
                    warn!(%scope, reason = %reason, "push channel dropped, reconnecting");
                    emitter.emit(ConnectivityState::Erroring);
                    outcome.send_replace(None);
                    reconnecting = true;
                }
            }
        }
    }

    /// Subscribe once and wait for the channel to confirm. Returns the
    /// channel with any events it delivered before confirming.
    async fn connect(
        &self,
        emitter: &Emitter,
        attempt: u32,
    ) -> Result<(PushChannel, Vec<MessageEvent>), FairwayError> {
        let scope = &emitter.scope;
        let mut channel = self.store.subscribe(scope).await?;
        let deadline = self.clock.sleep(self.subscribe_timeout);
        tokio::pin!(deadline);
        let mut early = Vec::new();

        loop {
            tokio::select! {
                biased;
                signal = channel.recv() => match signal {
                    Some(ChannelSignal::State(ConnectivityState::Active)) => return Ok((channel, early)),
                    Some(ChannelSignal::State(ConnectivityState::Pending)) => {
                        emitter.emit(ConnectivityState::Pending);
                    }
                    Some(ChannelSignal::State(state)) => {
                        return Err(FairwayError::channel(scope, format!("{state} before confirming")));
                    }
                    Some(ChannelSignal::Error(message)) => {
                        return Err(FairwayError::channel(scope, message));
                    }
                    Some(ChannelSignal::Event(event)) => early.push(event),
                    None => return Err(FairwayError::channel(scope, "closed before confirming")),
                },
                _ = &mut deadline => {
                    debug!(%scope, attempt, "push channel did not confirm in time");
                    return Err(FairwayError::channel(scope, "TIMED_OUT"));
                }
            }
        }
    }
}

/// Forward events until the channel drops. `None` means the scope was closed.
async fn pump(channel: &mut PushChannel, cancel: &CancellationToken, emitter: &Emitter) -> Option<String> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                channel.close();
                return None;
            }
            signal = channel.recv() => match signal {
                Some(ChannelSignal::Event(event)) => emitter.forward(event),
                Some(ChannelSignal::State(ConnectivityState::Active | ConnectivityState::Pending)) => {}
                Some(ChannelSignal::State(state)) => return Some(state.to_string()),
                Some(ChannelSignal::Error(message)) => return Some(message),
                None => return Some("feed dropped".to_string()),
            }
        }
    }
}

/// Per-scope reporter that only publishes connectivity changes.
struct Emitter {
    scope: ChannelScope,
    sink: mpsc::UnboundedSender<SyncSignal>,
    state: watch::Sender<ConnectivityState>,
}

impl Emitter {
    fn emit(&self, next: ConnectivityState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            self.signal(SyncSignal::Connectivity {
                scope: self.scope.clone(),
                state: next,
            });
        }
    }

    fn observe(&self, state: &ReconnectState) {
        let next = match state {
            ReconnectState::Idle => return,
            ReconnectState::Connecting { .. } => ConnectivityState::Pending,
            ReconnectState::Active => ConnectivityState::Active,
            ReconnectState::Backoff { .. } => ConnectivityState::Erroring,
            ReconnectState::Failed => ConnectivityState::Closed,
        };
        self.emit(next);
    }

    fn forward(&self, event: MessageEvent) {
        self.signal(SyncSignal::Inbound {
            scope: self.scope.clone(),
            event,
        });
    }

    fn signal(&self, signal: SyncSignal) {
        if self.sink.send(signal).is_err() {
            debug!(scope = %self.scope, "sync sink closed, dropping signal");
        }
    }
}
