//! Per-container overlay filesystems.
//!
//! Every container owns `upper/`, `work/`, and `merged/` directories
//! under the container storage root; `merged/` is the overlay mount
//! point and becomes the container's root. The lower directory is the
//! shared base root image, so writes land only in the per-container
//! upper layer.

use std::path::{Path, PathBuf};

use crib_common::error::{CribError, Result};

/// Paths of one container's overlay tree.
#[derive(Debug, Clone)]
pub struct OverlayDirs {
    /// Per-container root directory holding the three subdirectories.
    pub root: PathBuf,
    /// Writable upper layer.
    pub upper: PathBuf,
    /// Overlay work directory.
    pub work: PathBuf,
    /// Merged mount point; becomes the container root.
    pub merged: PathBuf,
}

impl OverlayDirs {
    /// Computes the fixed per-container paths for an id.
    #[must_use]
    pub fn for_container(id: &str) -> Self {
        Self::under(&crib_common::constants::container_dir(id))
    }

    /// Computes the paths under an explicit root (tests, alternate
    /// storage roots).
    #[must_use]
    pub fn under(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            upper: root.join("upper"),
            work: root.join("work"),
            merged: root.join("merged"),
        }
    }

    /// Creates the three directories.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::DirectoryCreateFailed`] on any mkdir error.
    pub fn create(&self) -> Result<()> {
        for dir in [&self.upper, &self.work, &self.merged] {
            std::fs::create_dir_all(dir).map_err(|e| CribError::DirectoryCreateFailed {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// The overlay mount option string for these directories.
    #[must_use]
    pub fn mount_options(&self, lower: &Path) -> String {
        format!(
            "lowerdir={},upperdir={},workdir={}",
            lower.display(),
            self.upper.display(),
            self.work.display()
        )
    }
}

/// Creates the per-container directories and mounts the overlay at the
/// merged path, returning the mount point.
///
/// # Errors
///
/// Returns [`CribError::DirectoryCreateFailed`] when directory creation
/// fails or [`CribError::Mount`] when the mount syscall fails.
#[cfg(target_os = "linux")]
pub fn create_overlay(id: &str) -> Result<PathBuf> {
    use nix::mount::{MsFlags, mount};

    let dirs = OverlayDirs::for_container(id);
    dirs.create()?;

    let lower = PathBuf::from(crib_common::constants::ROOTFS_DIR);
    let opts = dirs.mount_options(&lower);

    mount(
        Some("overlay"),
        &dirs.merged,
        Some("overlay"),
        MsFlags::empty(),
        Some(opts.as_str()),
    )
    .map_err(|e| CribError::Mount {
        message: format!("overlay mount at {} failed: {e}", dirs.merged.display()),
    })?;

    tracing::info!(container_id = %id, merged = %dirs.merged.display(), "overlay mounted");
    Ok(dirs.merged)
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error — overlay mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn create_overlay(_id: &str) -> Result<PathBuf> {
    Err(CribError::Config {
        message: "Linux required for native container operations".into(),
    })
}

/// Lazily unmounts the merged directory and removes the whole
/// per-container tree. Best-effort: failures are logged, not returned,
/// because teardown must always run to completion.
#[cfg(target_os = "linux")]
pub fn destroy_overlay(id: &str) {
    let dirs = OverlayDirs::for_container(id);
    if let Err(e) = nix::mount::umount2(&dirs.merged, nix::mount::MntFlags::MNT_DETACH) {
        tracing::warn!(merged = %dirs.merged.display(), error = %e, "overlay unmount failed");
    }
    if let Err(e) = std::fs::remove_dir_all(&dirs.root) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(root = %dirs.root.display(), error = %e, "overlay tree removal failed");
        }
    }
    tracing::info!(container_id = %id, "overlay destroyed");
}

/// Stub for non-Linux platforms.
#[cfg(not(target_os = "linux"))]
pub fn destroy_overlay(_id: &str) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirs_are_fixed_functions_of_the_id() {
        let dirs = OverlayDirs::for_container("abc123");
        assert_eq!(
            dirs.merged,
            PathBuf::from("/var/lib/crib/containers/abc123/merged")
        );
        assert_eq!(
            dirs.upper,
            PathBuf::from("/var/lib/crib/containers/abc123/upper")
        );
    }

    #[test]
    fn create_builds_all_three_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = OverlayDirs::under(&tmp.path().join("c1"));
        dirs.create().unwrap();
        assert!(dirs.upper.is_dir());
        assert!(dirs.work.is_dir());
        assert!(dirs.merged.is_dir());
    }

    #[test]
    fn mount_options_reference_all_layers() {
        let dirs = OverlayDirs::under(Path::new("/tmp/c1"));
        let opts = dirs.mount_options(Path::new("/var/lib/crib/rootfs"));
        assert_eq!(
            opts,
            "lowerdir=/var/lib/crib/rootfs,upperdir=/tmp/c1/upper,workdir=/tmp/c1/work"
        );
    }
}
