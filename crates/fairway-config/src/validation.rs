// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks constraints serde cannot express, such as non-zero capacities and
//! ordered delay bounds.

use crate::diagnostic::ConfigError;
use crate::model::FairwayConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration.
///
/// Collects every violation rather than stopping at the first.
pub fn validate_config(config: &FairwayConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    let level = config.engine.log_level.trim().to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        fail(format!(
            "engine.log_level `{}` is not one of {}",
            config.engine.log_level,
            LOG_LEVELS.join(", ")
        ));
    }

    for (key, value) in [
        ("engine.history_limit", config.engine.history_limit),
        ("dedup.conversation_capacity", config.dedup.conversation_capacity),
        ("dedup.global_capacity", config.dedup.global_capacity),
        ("backfill.page_size", config.backfill.page_size),
        ("backfill.max_pages", config.backfill.max_pages),
    ] {
        if value == 0 {
            fail(format!("{key} must be at least 1"));
        }
    }

    let reconnect = &config.reconnect;
    if reconnect.initial_delay_ms == 0 {
        fail("reconnect.initial_delay_ms must be greater than 0".to_string());
    }
    if reconnect.max_delay_ms < reconnect.initial_delay_ms {
        fail(format!(
            "reconnect.max_delay_ms ({}) must not be below reconnect.initial_delay_ms ({})",
            reconnect.max_delay_ms, reconnect.initial_delay_ms
        ));
    }
    if reconnect.subscribe_timeout_ms == 0 {
        fail("reconnect.subscribe_timeout_ms must be greater than 0".to_string());
    }

    let unread = &config.unread;
    if unread.failure_threshold == 0 {
        fail("unread.failure_threshold must be at least 1".to_string());
    }
    if unread.max_backoff_ms < unread.base_backoff_ms {
        fail(format!(
            "unread.max_backoff_ms ({}) must not be below unread.base_backoff_ms ({})",
            unread.max_backoff_ms, unread.base_backoff_ms
        ));
    }

    if config.polling.interval_ms == 0 {
        fail("polling.interval_ms must be greater than 0".to_string());
    }

    let watchdog = &config.watchdog;
    if watchdog.enabled && watchdog.check_interval_ms == 0 {
        fail("watchdog.check_interval_ms must be greater than 0".to_string());
    }
    if watchdog.restart_max_ms < watchdog.restart_base_ms {
        fail(format!(
            "watchdog.restart_max_ms ({}) must not be below watchdog.restart_base_ms ({})",
            watchdog.restart_max_ms, watchdog.restart_base_ms
        ));
    }

    if let Some(path) = &config.storage.cache_path
        && path.trim().is_empty()
    {
        fail("storage.cache_path must not be empty when set".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
