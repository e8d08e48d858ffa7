//! Scoped network namespace switching.
//!
//! Entering a container's namespace returns a guard whose drop restores
//! the original namespace unconditionally, so every exit path — early
//! return, error, panic — leaves the calling thread where it started.
//!
//! `setns(2)` is thread-scoped, but link operations run through child
//! processes that inherit the calling thread's namespace at fork. Any
//! other thread doing namespace-sensitive network work while a guard is
//! live would observe the wrong namespace, so all guarded work must be
//! serialized on one dedicated thread.

use std::fs::File;
use std::os::fd::AsFd;

use nix::sched::{CloneFlags, setns};

use crib_common::error::{CribError, Result};

/// Guard representing the calling thread's temporary presence inside
/// another process's network namespace.
#[derive(Debug)]
pub struct NetnsGuard {
    original: File,
}

impl NetnsGuard {
    /// Switches the calling thread into the network namespace of `pid`,
    /// capturing the current namespace for restoration.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::NamespaceSwitchFailed`] when either
    /// namespace file cannot be opened or `setns(2)` fails.
    pub fn enter_pid(pid: i32) -> Result<Self> {
        let original = File::open("/proc/self/ns/net").map_err(|e| switch_failed(
            format!("could not open current namespace: {e}"),
        ))?;
        let target_path = format!("/proc/{pid}/ns/net");
        let target = File::open(&target_path)
            .map_err(|e| switch_failed(format!("could not open {target_path}: {e}")))?;

        setns(target.as_fd(), CloneFlags::CLONE_NEWNET)
            .map_err(|e| switch_failed(format!("setns into pid {pid} failed: {e}")))?;
        tracing::debug!(pid, "entered container network namespace");
        Ok(Self { original })
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if let Err(e) = setns(self.original.as_fd(), CloneFlags::CLONE_NEWNET) {
            // Nothing sensible to do beyond recording it: the thread is
            // stranded in the container namespace.
            tracing::error!(error = %e, "failed to restore original network namespace");
        } else {
            tracing::debug!("restored original network namespace");
        }
    }
}

fn switch_failed(message: String) -> CribError {
    CribError::NamespaceSwitchFailed { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entering_a_nonexistent_pid_fails_cleanly() {
        let err = NetnsGuard::enter_pid(-1).unwrap_err();
        assert!(matches!(err, CribError::NamespaceSwitchFailed { .. }));
    }

    // Needs CAP_SYS_ADMIN; degrades to a no-op otherwise.
    #[test]
    fn dropping_the_guard_restores_the_entering_thread() {
        if !nix::unistd::Uid::effective().is_root() {
            return;
        }
        let ns_link = || std::fs::read_link("/proc/thread-self/ns/net").unwrap();
        let original = ns_link();

        let pid = i32::try_from(std::process::id()).unwrap_or(i32::MAX);
        let Ok(guard) = NetnsGuard::enter_pid(pid) else {
            return;
        };
        // Unsharing moves only this thread into a fresh namespace; the
        // guard still holds the one captured on entry.
        if nix::sched::unshare(CloneFlags::CLONE_NEWNET).is_err() {
            return;
        }
        assert_ne!(ns_link(), original);

        drop(guard);
        assert_eq!(ns_link(), original);
    }
}
