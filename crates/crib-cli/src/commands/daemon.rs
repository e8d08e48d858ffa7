//! `crib daemon` — run the control-plane daemon in the foreground.

use clap::Args;

/// Arguments for the `daemon` command.
#[derive(Args, Debug)]
pub struct DaemonArgs {
    /// Control socket path.
    #[arg(long, default_value = crib_common::constants::SOCKET_PATH)]
    pub socket: String,

    /// PID file path.
    #[arg(long, default_value = crib_common::constants::PID_FILE)]
    pub pid_file: String,

    /// Log file the daemon appends to.
    #[arg(long, default_value = crib_common::constants::LOG_FILE)]
    pub log_file: String,
}

/// Executes the `daemon` command.
///
/// Initializes the network stack once, then serves the container API
/// until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error when bootstrap, socket binding, or the accept loop
/// fails.
pub fn execute(args: &DaemonArgs) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let orchestrator = crib_daemon::bootstrap()?;
        let server = crib_daemon::Server::at(&args.socket, &args.pid_file, orchestrator);
        server.run().await
    })?;
    Ok(())
}
