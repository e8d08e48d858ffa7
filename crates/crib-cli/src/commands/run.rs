//! `crib run` — create a container via the daemon and attach to it.

use std::ffi::CString;
use std::path::Path;

use anyhow::Context;
use clap::Args;

use crib_common::config::CribConfig;
use crib_runtime::CreateRequest;

use crate::client;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Directory containing the crib.yaml image configuration.
    #[arg(default_value = ".")]
    pub dir: String,

    /// Control socket path.
    #[arg(long, default_value = crib_common::constants::SOCKET_PATH)]
    pub socket: String,
}

/// Executes the `run` command.
///
/// Reads `crib.yaml` from the target directory, asks the daemon to
/// create the container, then replaces this process with `nsenter`
/// joined to the container's namespaces.
///
/// # Errors
///
/// Returns an error when the configuration is missing, the daemon
/// request fails, or the exec fails.
pub fn execute(args: &RunArgs) -> anyhow::Result<()> {
    let dir = Path::new(&args.dir);
    let config = CribConfig::load_from(dir)?;
    let origin = dir
        .canonicalize()
        .with_context(|| format!("resolving {}", dir.display()))?;

    let request = CreateRequest {
        name: config.image_name,
        origin_folder: origin.display().to_string(),
        memory_limit: config.settings.memory_limit,
        cpu_limit: config.settings.cpu_limit,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let created = runtime.block_on(client::create_container(Path::new(&args.socket), &request))?;
    // The runtime must be gone before exec replaces this process.
    drop(runtime);

    tracing::info!(pid = created.pid, "container created, attaching");
    attach(created.pid)
}

/// Replaces this process with `nsenter` joining the container's UTS,
/// IPC, PID, network, and mount namespaces.
fn attach(pid: i32) -> anyhow::Result<()> {
    let argv: Vec<CString> = [
        "nsenter",
        "-t",
        &pid.to_string(),
        "-u",
        "-i",
        "-p",
        "-n",
        "-m",
        "/bin/sh",
    ]
    .iter()
    .map(|arg| CString::new(*arg))
    .collect::<Result<_, _>>()
    .context("building nsenter argv")?;

    match nix::unistd::execvp(&argv[0], &argv) {
        Ok(infallible) => match infallible {},
        Err(e) => Err(anyhow::anyhow!("exec nsenter failed: {e}")),
    }
}
