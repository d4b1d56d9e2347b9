// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Realtime conversation sync engine.
//!
//! The [`ConversationController`] is the central coordinator that:
//! - Keeps one push channel per open conversation plus a global badge channel
//! - Renders each message at most once, in creation order
//! - Catches up after reconnects, foreground transitions and pull-to-refresh
//! - Maintains badges and the unread total behind a circuit breaker
//! - Falls back to polling when a channel cannot be re-established
//! - Restarts realtime links that went silent

pub mod backfill;
pub mod controller;
pub mod cursor;
pub mod dedup;
pub mod send;
pub mod shared;
pub mod subscription;
pub mod timeline;
pub mod unread;
pub mod watchdog;
pub mod watermark;

pub use backfill::{BackfillOutcome, BackfillScheduler};
pub use controller::{ControllerBuilder, ConversationController};
pub use cursor::ReadCursors;
pub use dedup::DedupCache;
pub use send::SendRateLimiter;
pub use shared::SharedSyncState;
pub use subscription::{SubscriptionManager, SyncSignal};
pub use timeline::Timeline;
pub use unread::UnreadAggregator;
pub use watchdog::LinkWatchdog;
pub use watermark::Watermarks;
