//! Unified error types for the crib workspace.
//!
//! Each subsystem maps its failures onto these variants so the
//! orchestrator can decide per stage whether a failure is fatal to the
//! create attempt or merely advisory.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CribError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// An advisory file lock is already held by another process.
    #[error("file is locked by process {pid}")]
    LockHeld {
        /// PID recorded in the lock sidecar file.
        pid: String,
    },

    /// No candidate subnet avoided a conflict with a host network.
    #[error("no available subnet: all candidates conflict with host networks")]
    NoAvailableSubnet,

    /// The allocation cursor ran past the end of the subnet.
    #[error("subnet {subnet} exhausted")]
    SubnetExhausted {
        /// Subnet whose address space ran out.
        subnet: String,
    },

    /// A memory limit string could not be parsed.
    #[error("invalid memory specification: {spec}")]
    InvalidMemorySpec {
        /// The offending input.
        spec: String,
    },

    /// A bridge link could not be created or modified.
    #[error("bridge operation failed on {bridge}: {message}")]
    BridgeOperationFailed {
        /// Bridge interface name.
        bridge: String,
        /// Description of the failed operation.
        message: String,
    },

    /// A veth pair could not be created or attached.
    #[error("veth creation failed for {container}: {message}")]
    VethCreationFailed {
        /// Container the pair belongs to.
        container: String,
        /// Description of the failed operation.
        message: String,
    },

    /// Switching into or out of a network namespace failed.
    #[error("namespace switch failed: {message}")]
    NamespaceSwitchFailed {
        /// Description of the failed switch.
        message: String,
    },

    /// A network interface expected inside a namespace is missing.
    #[error("interface not found: {name}")]
    InterfaceNotFound {
        /// Interface name that could not be resolved.
        name: String,
    },

    /// Installing a route inside the container namespace failed.
    #[error("route install failed: {message}")]
    RouteInstallFailed {
        /// Description of the failed route operation.
        message: String,
    },

    /// NAT rule installation failed on the host.
    #[error("NAT setup failed: {message}")]
    NatSetupFailed {
        /// Description of the failed NAT operation.
        message: String,
    },

    /// A directory required for the overlay could not be created.
    #[error("directory create failed at {path}: {source}")]
    DirectoryCreateFailed {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A mount(2)-family syscall failed.
    #[error("mount operation failed: {message}")]
    Mount {
        /// Description of the failed mount.
        message: String,
    },

    /// Spawning the container init process failed.
    #[error("spawn failed: {message}")]
    Spawn {
        /// Description of the spawn failure.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// YAML serialization or deserialization failed.
    #[error("YAML error: {source}")]
    Yaml {
        /// Underlying YAML error.
        #[from]
        source: serde_yaml::Error,
    },
}

impl CribError {
    /// Shorthand for an [`CribError::Io`] from a path and source error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CribError>;
