// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-flight, minimum-interval guard in front of `MessageStore::insert`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use fairway_core::{Clock, ConversationId, FairwayError, Message, MessageStore, Timestamp, UserId};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct SendState {
    in_flight: bool,
    last_sent: Option<Timestamp>,
}

pub struct SendRateLimiter {
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
    min_interval: Duration,
    state: Mutex<SendState>,
}

/// Clears the in-flight flag on every exit path, including a dropped future.
struct Flight<'a>(&'a Mutex<SendState>);

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).in_flight = false;
    }
}

impl SendRateLimiter {
    /// Limiter accepting one send per `min_interval`.
    pub fn new(store: Arc<dyn MessageStore>, clock: Arc<dyn Clock>, min_interval: Duration) -> Self {
        Self {
            store,
            clock,
            min_interval,
            state: Mutex::new(SendState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send `body` to `conversation` as `sender`.
    ///
    /// Rejected without reaching the store when the body is blank, when a
    /// previous send is still running, or when the last accepted send was less
    /// than the minimum interval ago.
    pub async fn send(
        &self,
        conversation: &ConversationId,
        sender: &UserId,
        body: &str,
    ) -> Result<Message, FairwayError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(FairwayError::Validation("message body is empty".into()));
        }

        let _flight = {
            let now = self.clock.now();
            let mut state = self.lock();
            if state.in_flight {
                return Err(FairwayError::SendInProgress);
            }
            if let Some(last) = state.last_sent {
                let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
                if elapsed < self.min_interval {
                    let retry_after = self.min_interval - elapsed;
                    debug!(retry_after_ms = retry_after.as_millis() as u64, "send rejected, too soon");
                    return Err(FairwayError::RateLimited { retry_after });
                }
            }
            state.in_flight = true;
            Flight(&self.state)
        };

        match self.store.insert(conversation, sender, body).await {
            Ok(message) => {
                self.lock().last_sent = Some(self.clock.now());
                debug!(conversation = %conversation, message = %message.id, "message sent");
                Ok(message)
            }
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "send failed");
                Err(e)
            }
        }
    }

    #[cfg(test)]
    fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }
}
