//! Domain primitive types used across the crib workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a container instance.
///
/// Generated once at creation and used as the key for every filesystem,
/// network, and cgroup resource the container owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from an existing string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the fixed-length prefix used to derive interface names.
    ///
    /// Interface names are capped at 15 characters by the kernel, so the
    /// veth naming scheme only uses the first 8 characters of the id. Two
    /// ids sharing that prefix will collide; callers that care must check.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network facts recorded for one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Address assigned to the container-side interface.
    pub ip: String,
    /// Gateway address (the bridge address).
    pub gateway: String,
    /// Host bridge the container is attached to.
    pub bridge: String,
    /// Host-side veth interface name.
    pub host_veth: String,
    /// Container-side veth interface name (before its rename to eth0).
    pub container_veth: String,
}

/// Lifecycle marker for a container.
///
/// This is a marker, not an enforced state machine: the reaper performs
/// the only transition after creation (`Created`/`Running` → `Exited`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container has been created; init process spawned.
    Created,
    /// Container init is running and wired up.
    Running,
    /// Container init has exited and resources were reclaimed.
    Exited,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Identity and runtime facts for one container.
///
/// Exclusively owned by the registry while the daemon runs; mirrored into
/// the durable network store for crash recovery and listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Immutable unique identifier.
    pub id: ContainerId,
    /// PID of the container's init process; 0 until spawn succeeds.
    pub pid: i32,
    /// Image name the container was created from (informational).
    #[serde(default)]
    pub image: String,
    /// Argument vector executed inside the container.
    pub command: Vec<String>,
    /// Assigned networking facts.
    pub network: NetworkInfo,
    /// RFC 3339 creation timestamp, set once and never mutated.
    pub created_at: String,
    /// Lifecycle marker.
    pub status: ContainerStatus,
}

impl ContainerRecord {
    /// Builds a freshly created record with the fixed shell command.
    #[must_use]
    pub fn new(id: ContainerId, pid: i32, image: String, network: NetworkInfo) -> Self {
        Self {
            id,
            pid,
            image,
            command: vec!["/bin/sh".to_string()],
            network,
            created_at: chrono::Utc::now().to_rfc3339(),
            status: ContainerStatus::Created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_is_eight_chars() {
        let id = ContainerId::new("0123456789abcdef");
        assert_eq!(id.short(), "01234567");
    }

    #[test]
    fn short_id_handles_tiny_input() {
        let id = ContainerId::new("abc");
        assert_eq!(id.short(), "abc");
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ContainerId::generate(), ContainerId::generate());
    }

    #[test]
    fn status_serializes_lowercase() {
        let s = serde_json::to_string(&ContainerStatus::Created).unwrap();
        assert_eq!(s, "\"created\"");
    }

    #[test]
    fn record_defaults_to_shell_command() {
        let rec = ContainerRecord::new(
            ContainerId::generate(),
            42,
            String::new(),
            NetworkInfo::default(),
        );
        assert_eq!(rec.command, vec!["/bin/sh"]);
        assert_eq!(rec.status, ContainerStatus::Created);
    }
}
