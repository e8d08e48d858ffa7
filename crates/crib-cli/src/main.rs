//! # crib — minimal container runtime CLI.
//!
//! A single binary carrying the user-facing commands, the control-plane
//! daemon, and the hidden container init entrypoint the daemon
//! re-executes via `/proc/self/exe`.

mod client;
mod commands;

use anyhow::Context;
use clap::Parser;

use crate::commands::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;
    commands::execute(cli)
}

/// The daemon logs to its log file; every other command logs to stderr.
fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Command::Daemon(args) = &cli.command {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&args.log_file)
            .with_context(|| format!("opening log file {}", args.log_file))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Arc::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}
