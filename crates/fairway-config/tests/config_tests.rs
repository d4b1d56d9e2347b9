// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Fairway configuration system.

use fairway_config::diagnostic::ConfigError;
use fairway_config::model::FairwayConfig;
use fairway_config::{
    load_and_validate, load_and_validate_path, load_and_validate_str, load_config_from_str,
};
use figment::Jail;

#[test]
fn full_document_deserializes() {
    let toml = r#"
[engine]
log_level = "debug"
history_limit = 40

[dedup]
conversation_capacity = 200
global_capacity = 2000

[reconnect]
max_attempts = 3
initial_delay_ms = 250
max_delay_ms = 4000
subscribe_timeout_ms = 2000

[backfill]
foreground_min_interval_ms = 100
background_min_interval_ms = 5000
page_size = 20
max_pages = 2
default_lookback_secs = 600

[unread]
cache_ttl_secs = 10
failure_threshold = 2
base_backoff_ms = 1000
max_backoff_ms = 8000

[send]
min_interval_ms = 150

[polling]
interval_ms = 2500
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.engine.log_level, "debug");
    assert_eq!(config.engine.history_limit, 40);
    assert_eq!(config.dedup.global_capacity, 2000);
    assert_eq!(config.reconnect.max_attempts, 3);
    assert_eq!(config.reconnect.subscribe_timeout_ms, 2000);
    assert_eq!(config.backfill.page_size, 20);
    assert_eq!(config.backfill.default_lookback_secs, 600);
    assert_eq!(config.unread.failure_threshold, 2);
    assert_eq!(config.send.min_interval_ms, 150);
    assert_eq!(config.polling.interval_ms, 2500);
}

#[test]
fn empty_document_uses_defaults() {
    let config = load_config_from_str("").expect("empty TOML should use defaults");
    assert_eq!(config, FairwayConfig::default());
}

#[test]
fn unknown_top_level_section_is_rejected() {
    let err = load_config_from_str("[typing]\nenabled = true\n")
        .expect_err("unknown section should be rejected");
    let rendered = err.to_string();
    assert!(
        rendered.contains("unknown field") || rendered.contains("typing"),
        "got: {rendered}"
    );
}

#[test]
fn typo_produces_suggestion_and_valid_keys() {
    let toml = r#"
[backfill]
page_sise = 10
"#;

    let errors = load_and_validate_str(toml).expect_err("should produce errors");
    let unknown = errors.iter().find_map(|e| match e {
        ConfigError::UnknownKey {
            key,
            suggestion,
            valid_keys,
            ..
        } => Some((key.clone(), suggestion.clone(), valid_keys.clone())),
        _ => None,
    });
    let (key, suggestion, valid_keys) = unknown.expect("expected an UnknownKey error");
    assert_eq!(key, "page_sise");
    assert_eq!(suggestion.as_deref(), Some("page_size"));
    assert!(valid_keys.contains("max_pages"));
}

#[test]
fn wrong_type_is_reported() {
    let errors = load_and_validate_str("[send]\nmin_interval_ms = \"soon\"\n")
        .expect_err("string for integer should fail");
    assert!(
        errors.iter().any(|e| matches!(
            e,
            ConfigError::InvalidType { key, .. } if key.contains("min_interval_ms")
        )),
        "got: {errors:?}"
    );
}

#[test]
fn semantic_errors_are_collected() {
    let toml = r#"
[reconnect]
initial_delay_ms = 1000
max_delay_ms = 10

[dedup]
global_capacity = 0
"#;
    let errors = load_and_validate_str(toml).expect_err("semantic errors expected");
    assert_eq!(errors.len(), 2, "got: {errors:?}");
    assert!(
        errors
            .iter()
            .all(|e| matches!(e, ConfigError::Validation { .. }))
    );
}

#[test]
fn config_error_renders_with_miette() {
    use miette::{Diagnostic, GraphicalReportHandler};

    let error = ConfigError::UnknownKey {
        key: "max_atempts".to_string(),
        suggestion: Some("max_attempts".to_string()),
        valid_keys: "max_attempts, initial_delay_ms".to_string(),
        span: None,
        src: None,
    };
    assert!(error.code().is_some());
    let help = error.help().expect("help text").to_string();
    assert!(help.contains("did you mean `max_attempts`"), "got: {help}");

    let mut buf = String::new();
    GraphicalReportHandler::new()
        .render_report(&mut buf, &error)
        .expect("should render");
    assert!(buf.contains("max_atempts"));
}

#[test]
fn local_file_and_env_layer_in_order() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "fairway.toml",
            r#"
[engine]
history_limit = 25

[send]
min_interval_ms = 900
"#,
        )?;
        jail.set_env("FAIRWAY_SEND_MIN_INTERVAL_MS", "120");
        jail.set_env("FAIRWAY_BACKFILL_PAGE_SIZE", "10");

        let config = load_and_validate().map_err(|e| format!("{e:?}"))?;
        assert_eq!(config.engine.history_limit, 25);
        assert_eq!(config.send.min_interval_ms, 120);
        assert_eq!(config.backfill.page_size, 10);
        Ok(())
    });
}

#[test]
fn explicit_path_reports_span_for_typo() {
    Jail::expect_with(|jail| {
        jail.create_file("custom.toml", "[polling]\nintervall_ms = 5\n")?;
        let path = jail.directory().join("custom.toml");

        let errors = load_and_validate_path(&path).expect_err("typo should fail");
        let has_span = errors.iter().any(|e| {
            matches!(e, ConfigError::UnknownKey { key, span: Some(_), .. } if key == "intervall_ms")
        });
        assert!(has_span, "got: {errors:?}");
        Ok(())
    });
}

#[test]
fn missing_files_fall_back_to_defaults() {
    Jail::expect_with(|_jail| {
        let config = load_and_validate().map_err(|e| format!("{e:?}"))?;
        assert_eq!(config.polling.interval_ms, 10_000);
        Ok(())
    });
}
