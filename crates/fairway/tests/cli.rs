// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line tests that run the compiled `fairway` binary.
//!
//! Each run gets an empty environment and a fresh working directory, so host
//! configuration files and `FAIRWAY_*` variables cannot leak in.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn fairway(dir: &Path, args: &[&str], env: &[(&str, &str)]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fairway"))
        .args(args)
        .current_dir(dir)
        .env_clear()
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir.join("xdg"))
        .env("RUST_LOG", "off")
        .envs(env.iter().copied())
        .output()
        .expect("binary should start")
}

fn stdout_toml(output: &Output) -> toml::Table {
    let text = String::from_utf8_lossy(&output.stdout);
    text.parse::<toml::Table>()
        .unwrap_or_else(|e| panic!("stdout is not TOML ({e}):\n{text}"))
}

fn section_int(table: &toml::Table, section: &str, key: &str) -> i64 {
    table[section][key].as_integer().unwrap()
}

#[test]
fn check_config_prints_defaults() {
    let dir = TempDir::new().unwrap();
    let output = fairway(dir.path(), &["check-config"], &[]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let table = stdout_toml(&output);
    assert_eq!(section_int(&table, "engine", "history_limit"), 100);
    assert_eq!(section_int(&table, "polling", "interval_ms"), 10_000);
}

#[test]
fn local_file_and_env_override_defaults() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("fairway.toml"), "[engine]\nhistory_limit = 25\n").unwrap();

    let output = fairway(
        dir.path(),
        &["check-config"],
        &[("FAIRWAY_BACKFILL_PAGE_SIZE", "7")],
    );

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let table = stdout_toml(&output);
    assert_eq!(section_int(&table, "engine", "history_limit"), 25);
    assert_eq!(section_int(&table, "backfill", "page_size"), 7);
}

#[test]
fn explicit_config_path_is_used() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, "[send]\nmin_interval_ms = 900\n").unwrap();

    let output = fairway(
        dir.path(),
        &["check-config", "--config", path.to_str().unwrap()],
        &[],
    );

    assert!(output.status.success());
    assert_eq!(section_int(&stdout_toml(&output), "send", "min_interval_ms"), 900);
}

#[test]
fn invalid_value_fails_with_the_offending_key() {
    let dir = TempDir::new().unwrap();
    let output = fairway(
        dir.path(),
        &["check-config"],
        &[("FAIRWAY_ENGINE_HISTORY_LIMIT", "0")],
    );

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("history_limit"), "stderr: {stderr}");
    assert!(output.stdout.is_empty());
}

#[test]
fn unknown_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("fairway.toml"), "[polling]\nintervl_ms = 5\n").unwrap();

    let output = fairway(dir.path(), &["check-config"], &[]);

    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn simulate_json_emits_events_then_report() {
    let dir = TempDir::new().unwrap();
    let output = fairway(dir.path(), &["simulate", "--json"], &[]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let text = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let (report, events) = lines.split_last().unwrap();

    assert!(events.iter().all(|e| e["type"].is_string() && e["event_id"].is_string()));
    let rendered = events
        .iter()
        .filter(|e| e["type"] == "message_rendered")
        .count();
    assert_eq!(report["rendered"].as_u64(), Some(rendered as u64));
    assert_eq!(report["timeline"].as_array().map(Vec::len), Some(7));
}

#[test]
fn simulate_prints_a_summary_line() {
    let dir = TempDir::new().unwrap();
    let output = fairway(dir.path(), &["simulate"], &[]);

    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.starts_with("fairway simulate: timeline=7"), "stdout: {text}");
}
