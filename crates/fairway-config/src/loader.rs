// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Lookup order: `./fairway.toml` > `~/.config/fairway/fairway.toml` >
//! `/etc/fairway/fairway.toml`, with `FAIRWAY_*` environment overrides on top.

#![allow(clippy::result_large_err)] // figment::Error is external

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::FairwayConfig;

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/fairway/fairway.toml";

/// Configuration file in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "fairway.toml";

/// Sections that `FAIRWAY_<SECTION>_<KEY>` variables may address.
const ENV_SECTIONS: &[&str] = &[
    "engine", "dedup", "reconnect", "backfill", "unread", "send", "polling", "watchdog",
    "storage",
];

/// Per-user configuration file under the XDG config directory.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("fairway").join(LOCAL_CONFIG_FILE))
}

/// Load configuration from the standard hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/fairway/fairway.toml`
/// 3. `~/.config/fairway/fairway.toml`
/// 4. `./fairway.toml`
/// 5. `FAIRWAY_*` environment variables
pub fn load_config() -> Result<FairwayConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only. No files, no environment.
pub fn load_config_from_str(toml_content: &str) -> Result<FairwayConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FairwayConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from an explicit file with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<FairwayConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FairwayConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The unextracted Figment for the standard hierarchy.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(FairwayConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG_FILE))
        .merge(env_provider())
}

/// Environment provider mapping `FAIRWAY_BACKFILL_PAGE_SIZE` to `backfill.page_size`.
///
/// Only the first underscore after a known section name becomes a dot, since
/// key names themselves contain underscores.
pub fn env_provider() -> Env {
    Env::prefixed("FAIRWAY_").map(|key| map_env_key(key.as_str()).into())
}

/// Figment hands over the variable name in its original case, so it is
/// lowered before matching.
fn map_env_key(key: &str) -> String {
    let key = key.to_ascii_lowercase();
    for section in ENV_SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_split_on_section_only() {
        assert_eq!(map_env_key("backfill_page_size"), "backfill.page_size");
        assert_eq!(
            map_env_key("reconnect_subscribe_timeout_ms"),
            "reconnect.subscribe_timeout_ms"
        );
        assert_eq!(map_env_key("unread_cache_ttl_secs"), "unread.cache_ttl_secs");
        assert_eq!(map_env_key("storage_cache_path"), "storage.cache_path");
        assert_eq!(map_env_key("mystery"), "mystery");
    }

    #[test]
    fn env_keys_are_matched_in_any_case() {
        assert_eq!(map_env_key("BACKFILL_PAGE_SIZE"), "backfill.page_size");
        assert_eq!(map_env_key("Send_Min_Interval_Ms"), "send.min_interval_ms");
        assert_eq!(map_env_key("WATCHDOG_ENABLED"), "watchdog.enabled");
        assert_eq!(map_env_key("MYSTERY"), "mystery");
    }

    #[test]
    fn upper_case_env_vars_override_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("FAIRWAY_BACKFILL_PAGE_SIZE", "7");
            let config: FairwayConfig = Figment::new()
                .merge(Serialized::defaults(FairwayConfig::default()))
                .merge(env_provider())
                .extract()?;
            assert_eq!(config.backfill.page_size, 7);
            Ok(())
        });
    }

    #[test]
    fn user_config_lives_under_fairway_dir() {
        if let Some(path) = user_config_path() {
            assert!(path.ends_with("fairway/fairway.toml"));
        }
    }
}
