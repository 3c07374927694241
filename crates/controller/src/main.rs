// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Archetype controller daemon (arched)
//!
//! Background process that owns the topology database and drives every
//! host's runtime toward the desired topology.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use arche_controller::lifecycle;
use arche_controller::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("arched {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("arched {}", env!("CARGO_PKG_VERSION"));
                println!("Archetype controller daemon");
                println!();
                println!("USAGE:");
                println!("    arched");
                println!();
                println!("Configuration is taken from ARCHE_* environment variables;");
                println!("see the project documentation for the full list.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: arched [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load();
    let _log_guard = setup_logging(&config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting arched");
    let daemon = lifecycle::startup(config)?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    daemon.shutdown().await;
    Ok(())
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.state_dir)?;
    let log_path = config.log_path();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(guard)
}
