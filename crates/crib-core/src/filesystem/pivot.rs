//! Root filesystem switching via `pivot_root(2)`.
//!
//! Preferred over `chroot` because it actually replaces the root mount:
//! the old root is moved under `.oldroot` inside the new tree, lazily
//! unmounted, and removed, leaving no escape hatch.

use std::path::Path;

use crib_common::error::{CribError, Result};

/// Name of the temporary directory the old root is parked under.
pub const OLD_ROOT: &str = ".oldroot";

/// Pivots the calling process's root into `new_root`.
///
/// Creates `.oldroot` inside the new root, performs the pivot, changes
/// the working directory to `/`, then lazily unmounts and removes the
/// old root remnant.
///
/// # Errors
///
/// Returns [`CribError::Mount`] when any step fails. The caller is
/// expected to be inside a private mount namespace.
#[cfg(target_os = "linux")]
pub fn enter_root(new_root: &Path) -> Result<()> {
    use nix::mount::{MntFlags, umount2};
    use nix::unistd::{chdir, pivot_root};

    let old_root = new_root.join(OLD_ROOT);
    std::fs::create_dir_all(&old_root).map_err(|e| CribError::DirectoryCreateFailed {
        path: old_root.clone(),
        source: e,
    })?;

    pivot_root(new_root, &old_root).map_err(|e| CribError::Mount {
        message: format!("pivot_root into {} failed: {e}", new_root.display()),
    })?;
    chdir("/").map_err(|e| CribError::Mount {
        message: format!("chdir to new root failed: {e}"),
    })?;

    // The old root now lives at /.oldroot inside the new tree.
    let parked = Path::new("/").join(OLD_ROOT);
    umount2(&parked, MntFlags::MNT_DETACH).map_err(|e| CribError::Mount {
        message: format!("unmounting old root failed: {e}"),
    })?;
    if let Err(e) = std::fs::remove_dir(&parked) {
        tracing::warn!(error = %e, "could not remove old root directory");
    }

    tracing::info!(root = %new_root.display(), "root switched");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error — root switching requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn enter_root(_new_root: &Path) -> Result<()> {
    Err(CribError::Config {
        message: "Linux required for native container operations".into(),
    })
}
