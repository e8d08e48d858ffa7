//! Spawning the container init process.
//!
//! The daemon re-executes its own binary (`/proc/self/exe`) with the
//! hidden `init` subcommand. The child is created with `clone(2)` and
//! the namespace flags, so it lands in fresh UTS, PID, IPC, network,
//! and mount namespaces at creation and runs as PID 1 of its PID
//! namespace. `unshare(2)` would not do here: a new PID namespace only
//! applies to children created afterwards, never to the calling
//! process itself.

use nix::unistd::Pid;

use crib_common::error::{CribError, Result};
use crib_common::types::ContainerId;

/// Argument contract between the daemon and the re-executed init
/// process.
///
/// Serialized as positional arguments after the `init` subcommand, in
/// field order. Both sides must agree on this ordering.
#[derive(Debug, Clone)]
pub struct InitArgs {
    /// Container id; names the overlay tree and every other resource.
    pub id: ContainerId,
    /// Memory limit spec, e.g. `100m`.
    pub memory_limit: String,
    /// CPU limit as a percentage weight, e.g. `50`.
    pub cpu_limit: String,
    /// Container-side veth name the daemon pushes into the namespace.
    pub container_veth: String,
    /// Gateway address for the default route.
    pub gateway: String,
    /// Address allocated to the container.
    pub ip: String,
}

impl InitArgs {
    /// Renders the argument vector handed to the re-executed binary.
    #[must_use]
    pub fn to_argv(&self) -> Vec<String> {
        vec![
            "init".to_string(),
            self.id.to_string(),
            self.memory_limit.clone(),
            self.cpu_limit.clone(),
            self.container_veth.clone(),
            self.gateway.clone(),
            self.ip.clone(),
        ]
    }
}

/// Namespaces the init process is cloned into.
#[cfg(target_os = "linux")]
fn namespace_flags() -> nix::sched::CloneFlags {
    use nix::sched::CloneFlags;

    CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWIPC
        | CloneFlags::CLONE_NEWNET
        | CloneFlags::CLONE_NEWNS
}

#[cfg(target_os = "linux")]
const INIT_STACK_SIZE: usize = 1024 * 1024;

/// Clones the runtime binary as a container init process.
///
/// The returned pid is the host-side view of the container's PID 1;
/// it is what `nsenter` targets and what the reaper waits on. File
/// descriptors are inherited, so a foreground daemon shows the
/// container shell directly.
///
/// # Errors
///
/// Returns [`CribError::Spawn`] when the clone fails.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
pub fn spawn_init(args: &InitArgs) -> Result<Pid> {
    use std::ffi::CString;

    use nix::sys::signal::Signal;

    let mut argv = Vec::with_capacity(8);
    for arg in std::iter::once("/proc/self/exe".to_string()).chain(args.to_argv()) {
        argv.push(CString::new(arg).map_err(|e| CribError::Spawn {
            message: format!("bad init argument: {e}"),
        })?);
    }

    let exec = Box::new(|| {
        // Runs in the cloned child; on success execvp never returns.
        match nix::unistd::execvp(&argv[0], &argv) {
            Ok(infallible) => match infallible {},
            Err(e) => e as isize,
        }
    });

    let mut stack = vec![0u8; INIT_STACK_SIZE];
    // SAFETY: the child runs on its own stack and only calls execvp,
    // which either replaces the process image or leaves the child to
    // exit with the errno value.
    let child = unsafe {
        nix::sched::clone(
            exec,
            &mut stack,
            namespace_flags(),
            Some(Signal::SIGCHLD as i32),
        )
    }
    .map_err(|e| CribError::Spawn {
        message: format!("cloning init for {}: {e}", args.id),
    })?;

    tracing::info!(container_id = %args.id, pid = child.as_raw(), "init process spawned");
    Ok(child)
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error — namespace isolation requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn spawn_init(_args: &InitArgs) -> Result<Pid> {
    Err(CribError::Config {
        message: "Linux required for native container operations".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_follows_the_positional_contract() {
        let args = InitArgs {
            id: ContainerId::new("abc"),
            memory_limit: "100m".into(),
            cpu_limit: "50".into(),
            container_veth: "vethc-abc".into(),
            gateway: "172.17.0.1".into(),
            ip: "172.17.0.2".into(),
        };
        assert_eq!(
            args.to_argv(),
            vec!["init", "abc", "100m", "50", "vethc-abc", "172.17.0.1", "172.17.0.2"]
        );
    }

    // Needs CAP_SYS_ADMIN; degrades to a no-op otherwise.
    #[test]
    #[cfg(target_os = "linux")]
    #[allow(unsafe_code)]
    fn cloned_child_starts_as_pid_one_in_its_namespace() {
        use nix::sys::wait::{WaitStatus, waitpid};

        if !nix::unistd::Uid::effective().is_root() {
            return;
        }

        let check = Box::new(|| isize::from(nix::unistd::getpid().as_raw() != 1));
        let mut stack = vec![0u8; 64 * 1024];
        let Ok(child) = (unsafe {
            nix::sched::clone(
                check,
                &mut stack,
                namespace_flags(),
                Some(nix::sys::signal::Signal::SIGCHLD as i32),
            )
        }) else {
            // Kernel policy can refuse namespace creation even for root.
            return;
        };

        let status = waitpid(child, None).unwrap();
        assert_eq!(status, WaitStatus::Exited(child, 0));
    }
}
