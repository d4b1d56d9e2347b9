// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilience primitives for the Fairway sync engine.
//!
//! - [`BackoffPolicy`]: capped exponential delay schedule.
//! - [`with_retry`] / [`ReconnectMachine`]: clock-driven reconnection coordinator.
//! - [`CircuitBreaker`]: cooldown guard for the batched unread path.

pub mod backoff;
pub mod circuit;
pub mod reconnect;

pub use backoff::BackoffPolicy;
pub use circuit::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use reconnect::{ReconnectMachine, ReconnectState, with_retry};
