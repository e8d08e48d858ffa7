//! Advisory file locking for persisted network state.
//!
//! The lock is a sidecar file (`<path>.lock`) holding the owner's PID as
//! decimal text. Acquisition is fail-fast: if the sidecar exists the call
//! returns [`CribError::LockHeld`] immediately, pushing any retry policy
//! to the caller. Release happens on guard drop so early returns and
//! panics cannot leave the lock behind.

use std::path::{Path, PathBuf};

use crib_common::error::{CribError, Result};

/// A named advisory lock over one logical state file.
#[derive(Debug)]
pub struct FileLock {
    lock_path: PathBuf,
}

/// RAII guard holding an acquired lock; dropping it removes the sidecar.
#[derive(Debug)]
pub struct LockGuard {
    lock_path: PathBuf,
}

impl FileLock {
    /// Creates a lock handle for the given state file path.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        let mut name = path.as_os_str().to_owned();
        name.push(".lock");
        Self {
            lock_path: PathBuf::from(name),
        }
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// Creation uses `O_EXCL`, so two contenders can never both win:
    /// exactly one creates the sidecar, the other sees it and fails.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::LockHeld`] with the holder's PID when the
    /// sidecar already exists, or an I/O error if it cannot be created.
    pub fn acquire(&self) -> Result<LockGuard> {
        use std::io::Write;

        let created = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path);
        match created {
            Ok(mut file) => {
                let guard = LockGuard {
                    lock_path: self.lock_path.clone(),
                };
                file.write_all(std::process::id().to_string().as_bytes())
                    .map_err(|e| CribError::io(&self.lock_path, e))?;
                Ok(guard)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let pid = std::fs::read_to_string(&self.lock_path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                Err(CribError::LockHeld { pid })
            }
            Err(e) => Err(CribError::io(&self.lock_path, e)),
        }
    }

    /// Returns whether the sidecar currently exists.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock_path.exists()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.lock_path.display(), error = %e, "failed to release lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_creates_sidecar_with_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("default.yaml");
        let lock = FileLock::new(&state);

        let guard = lock.acquire().unwrap();
        let recorded = std::fs::read_to_string(dir.path().join("default.yaml.lock")).unwrap();
        assert_eq!(recorded, std::process::id().to_string());
        drop(guard);
    }

    #[test]
    fn second_acquire_fails_fast_with_holder_pid() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("default.yaml");
        let lock = FileLock::new(&state);

        let _guard = lock.acquire().unwrap();
        let err = lock.acquire().unwrap_err();
        match err {
            CribError::LockHeld { pid } => {
                assert_eq!(pid, std::process::id().to_string());
            }
            other => panic!("expected LockHeld, got {other}"),
        }
    }

    #[test]
    fn drop_releases_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("default.yaml");
        let lock = FileLock::new(&state);

        let guard = lock.acquire().unwrap();
        assert!(lock.is_locked());
        drop(guard);
        assert!(!lock.is_locked());

        // Reacquisition succeeds once the previous guard is gone.
        let _guard = lock.acquire().unwrap();
    }

    #[test]
    fn concurrent_acquisition_admits_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("default.yaml");

        // Guards stay alive in the join results, so no release can
        // happen before every thread has raced.
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || FileLock::new(&state).acquire())
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn foreign_lock_reports_foreign_pid() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("default.yaml");
        std::fs::write(dir.path().join("default.yaml.lock"), "4242").unwrap();

        let err = FileLock::new(&state).acquire().unwrap_err();
        match err {
            CribError::LockHeld { pid } => assert_eq!(pid, "4242"),
            other => panic!("expected LockHeld, got {other}"),
        }
    }
}
