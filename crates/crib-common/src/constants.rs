//! System-wide constants and the fixed filesystem layout.
//!
//! These paths form an implicit protocol between the daemon, the init
//! process, and the CLI; changing one side requires changing all three.

use std::path::PathBuf;

/// Base directory for durable runtime state.
pub const DATA_DIR: &str = "/var/lib/crib";

/// Directory holding per-container overlay trees and JSON records.
pub const CONTAINER_DIR: &str = "/var/lib/crib/containers";

/// Shared read-only lower directory for every container's overlay.
pub const ROOTFS_DIR: &str = "/var/lib/crib/rootfs";

/// Directory holding persisted network state files.
pub const NETWORK_DIR: &str = "/var/lib/crib/networks";

/// Control socket the daemon listens on.
pub const SOCKET_PATH: &str = "/var/run/crib.sock";

/// Daemon PID file.
pub const PID_FILE: &str = "/var/run/crib.pid";

/// Daemon log file, used when not running under a supervisor.
pub const LOG_FILE: &str = "/var/log/crib.log";

/// Name of the single host-side bridge shared by all containers.
pub const BRIDGE_NAME: &str = "crib0";

/// MTU recorded for the bridge.
pub const BRIDGE_MTU: u32 = 1500;

/// Cgroup v2 subtree all container init processes are attached to.
pub const CGROUP_PATH: &str = "/sys/fs/cgroup/crib";

/// Canonical interface name inside a container namespace.
pub const CONTAINER_IFACE: &str = "eth0";

/// PATH handed to the container shell.
pub const CONTAINER_PATH_ENV: &str = "/bin:/usr/bin:/sbin:/usr/sbin";

/// Candidate subnets probed in order when no persisted network exists.
pub const SUBNET_CANDIDATES: [&str; 4] = [
    "172.17.0.0/16",
    "172.18.0.0/16",
    "10.88.0.0/16",
    "192.168.100.0/16",
];

/// Hard cap written to `pids.max` for the shared cgroup.
pub const PIDS_MAX: u32 = 100;

/// Returns the per-container directory for the given id.
#[must_use]
pub fn container_dir(id: &str) -> PathBuf {
    PathBuf::from(CONTAINER_DIR).join(id)
}
