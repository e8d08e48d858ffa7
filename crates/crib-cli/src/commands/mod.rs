//! CLI command definitions and dispatch.

pub mod daemon;
pub mod init;
pub mod ps;
pub mod run;

use clap::{Parser, Subcommand};

/// crib — minimal namespaced container runtime.
#[derive(Parser, Debug)]
#[command(name = "crib", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the control-plane daemon in the foreground.
    Daemon(daemon::DaemonArgs),
    /// Create a container from the local crib.yaml and attach to it.
    Run(run::RunArgs),
    /// List containers on the default network.
    Ps(ps::PsArgs),
    /// Container init entrypoint, invoked by the daemon.
    #[command(hide = true)]
    Init(init::InitCmd),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Daemon(args) => daemon::execute(&args),
        Command::Run(args) => run::execute(&args),
        Command::Ps(args) => ps::execute(&args),
        Command::Init(args) => init::execute(args),
    }
}
