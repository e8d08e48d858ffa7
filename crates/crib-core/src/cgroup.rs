//! Cgroup v2 resource limiting.
//!
//! One shared subtree holds every container init process. Per-container
//! nodes would give real isolation between containers, but the shared
//! ceiling is the runtime's documented behavior, so the limiter keeps a
//! single fixed path and attaches each new PID to it.

use std::path::{Path, PathBuf};

use crib_common::error::{CribError, Result};

/// Quota period written alongside the CPU quota, in microseconds.
const CPU_PERIOD_US: u64 = 100_000;

/// Handle to the runtime's cgroup subtree.
#[derive(Debug, Clone)]
pub struct CgroupLimiter {
    path: PathBuf,
}

impl CgroupLimiter {
    /// Limiter over the fixed system path.
    #[must_use]
    pub fn system() -> Self {
        Self {
            path: PathBuf::from(crib_common::constants::CGROUP_PATH),
        }
    }

    /// Limiter over an explicit root (tests).
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The cgroup directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the subtree and writes memory, CPU, and PID limits, then
    /// attaches `pid`.
    ///
    /// Write order is fixed: `memory.max`, `cpu.max`, `pids.max`,
    /// `cgroup.procs`. The first failing write aborts the remaining
    /// ones and is returned.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::InvalidMemorySpec`] for an unparsable memory
    /// string, a config error for a non-integer CPU value, or an I/O
    /// error from the failing write.
    pub fn apply_limits(&self, pid: i32, memory: &str, cpu: &str) -> Result<()> {
        std::fs::create_dir_all(&self.path).map_err(|e| CribError::io(&self.path, e))?;

        let memory_bytes = parse_memory(memory)?;
        self.write("memory.max", &memory_bytes.to_string())?;

        let weight: u64 = cpu.trim().parse().map_err(|_| CribError::Config {
            message: format!("invalid cpu limit: {cpu}"),
        })?;
        let quota = weight * 1000;
        self.write("cpu.max", &format!("{quota} {CPU_PERIOD_US}"))?;

        self.write("pids.max", &crib_common::constants::PIDS_MAX.to_string())?;
        self.write("cgroup.procs", &pid.to_string())?;

        tracing::info!(pid, memory, cpu, cgroup = %self.path.display(), "limits applied");
        Ok(())
    }

    /// Removes the cgroup directory. A missing directory is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when removal fails for another reason.
    pub fn destroy(&self) -> Result<()> {
        match std::fs::remove_dir(&self.path) {
            Ok(()) => {
                tracing::info!(cgroup = %self.path.display(), "cgroup removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CribError::io(&self.path, e)),
        }
    }

    fn write(&self, file: &str, value: &str) -> Result<()> {
        let path = self.path.join(file);
        std::fs::write(&path, value).map_err(|e| CribError::io(&path, e))
    }
}

/// Parses a human memory string into bytes.
///
/// Accepts an optional `k`/`K`/`m`/`M`/`g`/`G` suffix; a bare number is
/// raw bytes.
///
/// # Errors
///
/// Returns [`CribError::InvalidMemorySpec`] for anything else.
pub fn parse_memory(spec: &str) -> Result<u64> {
    let spec = spec.trim();
    let invalid = || CribError::InvalidMemorySpec {
        spec: spec.to_string(),
    };
    if spec.is_empty() {
        return Err(invalid());
    }

    let (number, multiplier) = match spec.chars().last() {
        Some('k' | 'K') => (&spec[..spec.len() - 1], 1024),
        Some('m' | 'M') => (&spec[..spec.len() - 1], 1024 * 1024),
        Some('g' | 'G') => (&spec[..spec.len() - 1], 1024 * 1024 * 1024),
        Some(c) if c.is_ascii_digit() => (spec, 1),
        _ => return Err(invalid()),
    };

    let value: u64 = number.parse().map_err(|_| invalid())?;
    value.checked_mul(multiplier).ok_or_else(invalid)
}
