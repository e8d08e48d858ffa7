//! Pseudo-filesystem mounts required inside a fresh container.
//!
//! A new mount/PID namespace starts without `/proc`, `/sys`, or `/dev`
//! views for the isolated process tree; the init process mounts them
//! right after pivoting.

use crib_common::error::{CribError, Result};

/// Marks the whole mount tree private so container mounts never
/// propagate back to the host.
///
/// # Errors
///
/// Returns [`CribError::Mount`] when the remount fails.
#[cfg(target_os = "linux")]
pub fn make_mounts_private() -> Result<()> {
    use nix::mount::{MsFlags, mount};

    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| CribError::Mount {
        message: format!("making mounts private failed: {e}"),
    })
}

/// Mounts `/proc` (proc), `/sys` (sysfs), and `/dev` (tmpfs) inside the
/// container root.
///
/// # Errors
///
/// Returns [`CribError::Mount`] on the first mount that fails.
#[cfg(target_os = "linux")]
pub fn mount_pseudo_filesystems() -> Result<()> {
    use nix::mount::{MsFlags, mount};

    let mounts: [(&str, &str, &str); 3] = [
        ("proc", "/proc", "proc"),
        ("sysfs", "/sys", "sysfs"),
        ("tmpfs", "/dev", "tmpfs"),
    ];
    for (source, target, fstype) in mounts {
        mount(
            Some(source),
            target,
            Some(fstype),
            MsFlags::empty(),
            None::<&str>,
        )
        .map_err(|e| CribError::Mount {
            message: format!("mounting {fstype} at {target} failed: {e}"),
        })?;
        tracing::debug!(target, fstype, "pseudo filesystem mounted");
    }
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error — mount namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn make_mounts_private() -> Result<()> {
    Err(CribError::Config {
        message: "Linux required for native container operations".into(),
    })
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error — mount namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_pseudo_filesystems() -> Result<()> {
    Err(CribError::Config {
        message: "Linux required for native container operations".into(),
    })
}
