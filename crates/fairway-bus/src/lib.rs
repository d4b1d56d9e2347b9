// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed event bus for the Fairway sync engine.
//!
//! A thin wrapper over `tokio::sync::broadcast`. Publishing is best-effort and
//! never blocks the engine; a subscription ends when its receiver is dropped.

pub mod events;

use tokio::sync::broadcast;
use tracing::warn;

pub use events::{EngineEvent, Envelope};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every live subscriber. Returns how many received it.
    pub fn publish(&self, event: EngineEvent) -> usize {
        self.tx.send(Envelope::new(event)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A bus subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventReceiver {
    rx: broadcast::Receiver<Envelope>,
}

impl EventReceiver {
    /// Next event, skipping over any the receiver lagged past.
    ///
    /// Returns `None` once every bus handle is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, dropping events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, dropping events");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        std::iter::from_fn(|| self.try_recv())
            .map(|envelope| envelope.event)
            .collect()
    }
}
