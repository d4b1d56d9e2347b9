// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Fairway integration tests.
//!
//! Provides a fault-injecting store wrapper and test harness infrastructure
//! for fast, deterministic tests driven by a manual clock.
//!
//! # Components
//!
//! - [`FlakyStore`] - wraps any store and fails chosen operations on demand
//! - [`TestHarness`] - in-memory store, manual clock and a running controller

pub mod flaky;
pub mod harness;

pub use flaky::{Fault, FlakyStore, StoreOp};
pub use harness::{TestHarness, TestHarnessBuilder, message_at, rendered_ids, ts};
