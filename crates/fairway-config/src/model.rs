// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Fairway sync engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Fairway configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to the engine's tuned values.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FairwayConfig {
    /// Engine-wide settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Deduplication cache sizes.
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Push channel reconnection policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Catch-up fetch throttles and paging.
    #[serde(default)]
    pub backfill: BackfillConfig,

    /// Unread count cache and circuit breaker.
    #[serde(default)]
    pub unread: UnreadConfig,

    /// Outgoing message rate limit.
    #[serde(default)]
    pub send: SendConfig,

    /// Polling fallback used when push channels are down.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Stale realtime link detection.
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Device-local cache for read cursors and watermarks.
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Number of messages fetched when a conversation is opened.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_history_limit() -> usize {
    100
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DedupConfig {
    /// Capacity of the cache reset on every conversation switch.
    #[serde(default = "default_conversation_capacity")]
    pub conversation_capacity: usize,

    /// Capacity of the session-wide cache guarding badge increments.
    #[serde(default = "default_global_capacity")]
    pub global_capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            conversation_capacity: default_conversation_capacity(),
            global_capacity: default_global_capacity(),
        }
    }
}

fn default_conversation_capacity() -> usize {
    500
}

fn default_global_capacity() -> usize {
    1000
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    /// Retries after the first failed subscribe before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, doubled on every further failure.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Ceiling for the retry delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// How long a new channel may stay pending before it counts as timed out.
    #[serde(default = "default_subscribe_timeout_ms")]
    pub subscribe_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            subscribe_timeout_ms: default_subscribe_timeout_ms(),
        }
    }
}

impl ReconnectConfig {
    /// Delay before the first retry.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Cap on any single retry delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// How long a new channel may take to confirm.
    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_subscribe_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackfillConfig {
    /// Minimum spacing between backfills while the app is visible.
    #[serde(default)]
    pub foreground_min_interval_ms: u64,

    /// Minimum spacing between backfills while the app is hidden.
    #[serde(default = "default_background_min_interval_ms")]
    pub background_min_interval_ms: u64,

    /// Messages requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Upper bound on pages fetched per conversation in one backfill.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// How far back to look when a conversation has no known watermark.
    #[serde(default = "default_lookback_secs")]
    pub default_lookback_secs: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            foreground_min_interval_ms: 0,
            background_min_interval_ms: default_background_min_interval_ms(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            default_lookback_secs: default_lookback_secs(),
        }
    }
}

impl BackfillConfig {
    /// Spacing between runs of one scope in the foreground.
    pub fn foreground_min_interval(&self) -> Duration {
        Duration::from_millis(self.foreground_min_interval_ms)
    }

    /// Spacing between runs of one scope in the background.
    pub fn background_min_interval(&self) -> Duration {
        Duration::from_millis(self.background_min_interval_ms)
    }

    /// How far back a conversation without a watermark is fetched.
    pub fn default_lookback(&self) -> Duration {
        Duration::from_secs(self.default_lookback_secs)
    }
}

fn default_background_min_interval_ms() -> u64 {
    8_000
}

fn default_page_size() -> usize {
    50
}

fn default_max_pages() -> usize {
    5
}

fn default_lookback_secs() -> u64 {
    86_400
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UnreadConfig {
    /// Lifetime of a cached count.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Consecutive batch failures before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Open window after reaching the threshold, doubled per extra failure.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Ceiling for the open window.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for UnreadConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            failure_threshold: default_failure_threshold(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl UnreadConfig {
    /// How long a computed count is served from cache.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Circuit open window after the threshold is first reached.
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    /// Longest circuit open window.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

fn default_cache_ttl_secs() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    60_000
}

fn default_max_backoff_ms() -> u64 {
    300_000
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SendConfig {
    /// Minimum spacing between accepted sends.
    #[serde(default = "default_send_min_interval_ms")]
    pub min_interval_ms: u64,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_send_min_interval_ms(),
        }
    }
}

impl SendConfig {
    /// Minimum spacing between accepted sends.
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

fn default_send_min_interval_ms() -> u64 {
    300
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PollingConfig {
    #[serde(default = "default_polling_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_polling_interval_ms(),
        }
    }
}

impl PollingConfig {
    /// Time between polling ticks.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_polling_interval_ms() -> u64 {
    10_000
}

/// Restarts realtime when no push event arrived for a while.
///
/// Checks run every `check_interval_ms` while the app is in the foreground.
/// A link silent for longer than `stale_after_ms` is restarted after
/// `min(restart_base_ms * 2^n, restart_max_ms)` plus up to `jitter_ms`, where
/// `n` counts restarts since the link was last seen fresh.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WatchdogConfig {
    #[serde(default = "default_watchdog_enabled")]
    pub enabled: bool,

    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,

    #[serde(default = "default_restart_base_ms")]
    pub restart_base_ms: u64,

    #[serde(default = "default_restart_max_ms")]
    pub restart_max_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: default_watchdog_enabled(),
            check_interval_ms: default_check_interval_ms(),
            stale_after_ms: default_stale_after_ms(),
            restart_base_ms: default_restart_base_ms(),
            restart_max_ms: default_restart_max_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl WatchdogConfig {
    /// Time between link checks.
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Silence after which a link counts as stale.
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    /// Delay before the first restart of a stale link.
    pub fn restart_base(&self) -> Duration {
        Duration::from_millis(self.restart_base_ms)
    }

    /// Cap on the restart delay.
    pub fn restart_max(&self) -> Duration {
        Duration::from_millis(self.restart_max_ms)
    }
}

fn default_watchdog_enabled() -> bool {
    true
}

fn default_check_interval_ms() -> u64 {
    3_000
}

fn default_stale_after_ms() -> u64 {
    5_000
}

fn default_restart_base_ms() -> u64 {
    1_000
}

fn default_restart_max_ms() -> u64 {
    15_000
}

fn default_jitter_ms() -> u64 {
    400
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// SQLite file for the local cache. `None` keeps the cache in memory.
    #[serde(default)]
    pub cache_path: Option<String>,
}
