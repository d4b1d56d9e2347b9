// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fairway - realtime conversation sync engine.
//!
//! This is the binary entry point: configuration checks and a scripted
//! session against the in-memory store.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod shutdown;
mod simulate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fairway_bus::Envelope;
use fairway_config::FairwayConfig;
use tracing::{error, warn};

/// Fairway - realtime conversation sync engine.
#[derive(Parser, Debug)]
#[command(name = "fairway", version, about, long_about = None)]
struct Cli {
    /// Load this file instead of the standard configuration hierarchy.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration and print the effective settings as TOML.
    CheckConfig,
    /// Run a scripted sync session against the in-memory store.
    Simulate {
        /// Print every engine event as a JSON line.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => fairway_config::load_and_validate_path(path),
        None => fairway_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            fairway_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.engine.log_level);

    match cli.command {
        Some(Commands::CheckConfig) => check_config(&config),
        Some(Commands::Simulate { json }) => simulate_session(config, json).await,
        None => {
            println!("fairway: use --help for available commands");
        }
    }
}

fn check_config(config: &FairwayConfig) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => print!("{rendered}"),
        Err(e) => {
            eprintln!("fairway: could not render configuration: {e}");
            std::process::exit(1);
        }
    }
}

async fn simulate_session(config: FairwayConfig, json: bool) {
    let token = shutdown::install_signal_handler();
    let mut print_event = |envelope: &Envelope| {
        if !json {
            return;
        }
        match envelope.to_json() {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "event could not be serialized"),
        }
    };

    let report = tokio::select! {
        report = simulate::run(config, &mut print_event) => report,
        _ = token.cancelled() => {
            eprintln!("fairway: simulation interrupted");
            std::process::exit(130);
        }
    };

    match report {
        Ok(report) if json => match serde_json::to_string(&report) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "report could not be serialized"),
        },
        Ok(report) => println!("fairway simulate: {}", report.summary()),
        Err(e) => {
            error!(error = %e, "simulation failed");
            eprintln!("fairway: simulation failed: {e}");
            std::process::exit(1);
        }
    }
}

/// Logs go to stderr so `--json` output stays machine-readable.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "fairway={log_level},fairway_sync={log_level},fairway_store={log_level},warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_parses_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["fairway", "simulate", "--json", "--config", "x.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(cli.command, Some(Commands::Simulate { json: true })));
    }

    #[test]
    fn default_config_renders_as_toml() {
        let rendered = toml::to_string_pretty(&FairwayConfig::default()).unwrap();
        let parsed = fairway_config::load_and_validate_str(&rendered).unwrap();
        assert_eq!(parsed, FairwayConfig::default());
    }
}
