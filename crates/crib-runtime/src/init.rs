//! Container init entrypoint.
//!
//! Runs in the re-executed child after namespace unsharing: sets the
//! hostname, mounts the overlay, pivots into it, mounts the pseudo
//! filesystems, and runs the container shell until it exits. Resource
//! limits and interface wiring are applied from the daemon side; this
//! process only has to exist and keep PID 1 semantics for its children.

use crib_common::constants::CONTAINER_PATH_ENV;
use crib_common::error::{CribError, Result};
use crib_core::filesystem::{mount, overlay, pivot};

use crate::spawn::InitArgs;

/// Prepares the container environment and runs the shell.
///
/// Returns the shell's exit code. The daemon's reaper observes this
/// process's exit and performs teardown; nothing here cleans up.
///
/// # Errors
///
/// Returns a mount or spawn error when any preparation step fails.
pub fn run(args: &InitArgs) -> Result<i32> {
    tracing::info!(
        container_id = %args.id,
        ip = %args.ip,
        gateway = %args.gateway,
        veth = %args.container_veth,
        "container init starting"
    );

    if let Err(e) = nix::unistd::sethostname(args.id.short()) {
        tracing::warn!(error = %e, "could not set container hostname");
    }

    mount::make_mounts_private()?;
    let merged = overlay::create_overlay(args.id.as_str())?;
    pivot::enter_root(&merged)?;
    mount::mount_pseudo_filesystems()?;

    let status = std::process::Command::new("/bin/sh")
        .env_clear()
        .env("PATH", CONTAINER_PATH_ENV)
        .status()
        .map_err(|e| CribError::Spawn {
            message: format!("container shell: {e}"),
        })?;

    let code = status.code().unwrap_or_default();
    tracing::info!(container_id = %args.id, code, "container shell exited");
    Ok(code)
}
