//! Durable network state.
//!
//! One YAML file per logical network under the network directory; this
//! runtime only ever uses `default.yaml`. The on-disk copy is the source
//! of truth for IP allocation: every mutation is a read-modify-write
//! under the advisory file lock so multiple daemon processes cannot
//! interleave allocations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crib_common::error::{CribError, Result};
use crib_common::types::{ContainerId, ContainerRecord, ContainerStatus};

use crate::lock::FileLock;

/// Bridge metadata persisted with the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bridge interface name.
    pub name: String,
    /// Bridge MTU.
    pub mtu: u32,
}

/// IP address management state persisted with the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpamState {
    /// Subnet in CIDR notation.
    pub subnet: String,
    /// Gateway address (assigned to the bridge).
    pub gateway: String,
    /// Next allocatable address; monotonically increasing, never reissued.
    pub next_ip: String,
    /// Owner name → allocated address.
    #[serde(default)]
    pub allocated_ips: BTreeMap<String, String>,
}

/// Persisted state of one network and the containers attached to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkState {
    /// Unique network id.
    pub id: String,
    /// Human-readable network name.
    pub name: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// Bridge metadata.
    pub bridge: BridgeConfig,
    /// Allocation state.
    pub ipam: IpamState,
    /// Records of containers attached to this network, append-only.
    #[serde(default)]
    pub containers: Vec<ContainerRecord>,
}

/// Handle to the network state directory.
#[derive(Debug, Clone)]
pub struct NetworkStore {
    dir: PathBuf,
}

impl NetworkStore {
    /// Store rooted at the system network directory.
    #[must_use]
    pub fn system() -> Self {
        Self {
            dir: PathBuf::from(crib_common::constants::NETWORK_DIR),
        }
    }

    /// Store rooted at an arbitrary directory (tests, alternate roots).
    #[must_use]
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the default network file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join("default.yaml")
    }

    /// Whether a persisted default network exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    /// Reads the persisted state without taking the lock.
    ///
    /// Reads are lock-free by design; writers serialize among themselves
    /// and YAML files are replaced whole.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read(&self) -> Result<NetworkState> {
        let path = self.path();
        let data = std::fs::read_to_string(&path).map_err(|e| CribError::io(&path, e))?;
        Ok(serde_yaml::from_str(&data)?)
    }

    /// Writes the full state under the file lock, refreshing `created_at`.
    ///
    /// # Errors
    ///
    /// Fails fast with [`CribError::LockHeld`] if another process holds
    /// the lock, or with an I/O error if the write fails.
    pub fn write(&self, state: &mut NetworkState) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| CribError::io(&self.dir, e))?;
        let path = self.path();
        let _guard = FileLock::new(&path).acquire()?;

        state.created_at = chrono::Utc::now().to_rfc3339();
        self.write_locked(&path, state)
    }

    /// Appends a container record to the persisted `containers` list.
    ///
    /// # Errors
    ///
    /// Fails with [`CribError::LockHeld`] on lock contention or with a
    /// read/parse/write error.
    pub fn append_container(&self, record: &ContainerRecord) -> Result<()> {
        let path = self.path();
        let _guard = FileLock::new(&path).acquire()?;

        let mut state = self.read()?;
        state.containers.push(record.clone());
        self.write_locked(&path, &state)
    }

    /// Marks a persisted container record with a new status.
    ///
    /// # Errors
    ///
    /// Fails with [`CribError::LockHeld`] on lock contention or with a
    /// read/parse/write error. A missing record is not an error.
    pub fn set_container_status(&self, id: &ContainerId, status: ContainerStatus) -> Result<()> {
        let path = self.path();
        let _guard = FileLock::new(&path).acquire()?;

        let mut state = self.read()?;
        if let Some(rec) = state.containers.iter_mut().find(|c| c.id == *id) {
            rec.status = status;
        }
        self.write_locked(&path, &state)
    }

    /// Updates the persisted IPAM block (cursor and allocation map).
    ///
    /// # Errors
    ///
    /// Fails with [`CribError::LockHeld`] on lock contention or with a
    /// read/parse/write error.
    pub fn update_ipam(&self, ipam: &IpamState) -> Result<()> {
        let path = self.path();
        let _guard = FileLock::new(&path).acquire()?;

        let mut state = self.read()?;
        state.ipam = ipam.clone();
        self.write_locked(&path, &state)
    }

    /// Runs a read-modify-write of the IPAM block under one lock
    /// acquisition.
    ///
    /// The closure observes the freshly read block; its mutation is
    /// persisted before the lock is released, so two processes can
    /// never both act on the same cursor value.
    ///
    /// # Errors
    ///
    /// Fails with [`CribError::LockHeld`] on lock contention, with a
    /// read/parse/write error, or with whatever error the closure
    /// returns — in which case nothing is persisted.
    pub fn mutate_ipam<T>(&self, f: impl FnOnce(&mut IpamState) -> Result<T>) -> Result<T> {
        let path = self.path();
        let _guard = FileLock::new(&path).acquire()?;

        let mut state = self.read()?;
        let value = f(&mut state.ipam)?;
        self.write_locked(&path, &state)?;
        Ok(value)
    }

    /// Removes one owner from the persisted allocation map.
    ///
    /// The cursor never rewinds: releasing an address only forgets the
    /// owner, it does not make the address reallocatable.
    ///
    /// # Errors
    ///
    /// Fails with [`CribError::LockHeld`] on lock contention or with a
    /// read/parse/write error.
    pub fn release_ip(&self, owner: &str) -> Result<()> {
        let path = self.path();
        let _guard = FileLock::new(&path).acquire()?;

        let mut state = self.read()?;
        let _ = state.ipam.allocated_ips.remove(owner);
        self.write_locked(&path, &state)
    }

    // Write-to-temp plus rename keeps lock-free readers from ever
    // observing a half-written file. Only called with the lock held, so
    // the temp name cannot collide.
    fn write_locked(&self, path: &Path, state: &NetworkState) -> Result<()> {
        let data = serde_yaml::to_string(state)?;
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, data).map_err(|e| CribError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| CribError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crib_common::types::NetworkInfo;

    fn sample_state() -> NetworkState {
        NetworkState {
            id: "net-1".into(),
            name: "default".into(),
            created_at: String::new(),
            bridge: BridgeConfig {
                name: "crib0".into(),
                mtu: 1500,
            },
            ipam: IpamState {
                subnet: "172.17.0.0/16".into(),
                gateway: "172.17.0.1".into(),
                next_ip: "172.17.0.2".into(),
                allocated_ips: BTreeMap::new(),
            },
            containers: Vec::new(),
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = NetworkStore::at(dir.path());

        let mut state = sample_state();
        store.write(&mut state).unwrap();

        let loaded = store.read().unwrap();
        assert_eq!(loaded.name, "default");
        assert_eq!(loaded.bridge.name, "crib0");
        assert_eq!(loaded.ipam.next_ip, "172.17.0.2");
        assert!(!loaded.created_at.is_empty());
    }

    #[test]
    fn append_container_grows_the_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = NetworkStore::at(dir.path());
        store.write(&mut sample_state()).unwrap();

        let record = ContainerRecord::new(
            ContainerId::generate(),
            100,
            String::new(),
            NetworkInfo::default(),
        );
        store.append_container(&record).unwrap();

        let loaded = store.read().unwrap();
        assert_eq!(loaded.containers.len(), 1);
        assert_eq!(loaded.containers[0].pid, 100);
    }

    #[test]
    fn write_fails_fast_when_locked() {
        let dir = tempfile::tempdir().unwrap();
        let store = NetworkStore::at(dir.path());
        std::fs::write(dir.path().join("default.yaml.lock"), "999").unwrap();

        let err = store.write(&mut sample_state()).unwrap_err();
        assert!(matches!(err, CribError::LockHeld { .. }));
    }

    #[test]
    fn set_status_updates_matching_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = NetworkStore::at(dir.path());
        store.write(&mut sample_state()).unwrap();

        let id = ContainerId::generate();
        let record =
            ContainerRecord::new(id.clone(), 7, String::new(), NetworkInfo::default());
        store.append_container(&record).unwrap();
        store
            .set_container_status(&id, ContainerStatus::Exited)
            .unwrap();

        let loaded = store.read().unwrap();
        assert_eq!(loaded.containers[0].status, ContainerStatus::Exited);
    }

    #[test]
    fn mutate_ipam_persists_the_closure_result() {
        let dir = tempfile::tempdir().unwrap();
        let store = NetworkStore::at(dir.path());
        store.write(&mut sample_state()).unwrap();

        let seen = store
            .mutate_ipam(|ipam| {
                let cursor = ipam.next_ip.clone();
                ipam.next_ip = "172.17.0.3".into();
                Ok(cursor)
            })
            .unwrap();
        assert_eq!(seen, "172.17.0.2");
        assert_eq!(store.read().unwrap().ipam.next_ip, "172.17.0.3");
    }

    #[test]
    fn mutate_ipam_abandons_changes_when_the_closure_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = NetworkStore::at(dir.path());
        store.write(&mut sample_state()).unwrap();

        let err = store
            .mutate_ipam(|ipam| {
                ipam.next_ip = "9.9.9.9".into();
                Err::<(), _>(CribError::NoAvailableSubnet)
            })
            .unwrap_err();
        assert!(matches!(err, CribError::NoAvailableSubnet));
        assert_eq!(store.read().unwrap().ipam.next_ip, "172.17.0.2");
    }

    #[test]
    fn release_ip_forgets_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = NetworkStore::at(dir.path());
        let mut state = sample_state();
        let _ = state
            .ipam
            .allocated_ips
            .insert("box".into(), "172.17.0.2".into());
        store.write(&mut state).unwrap();

        store.release_ip("box").unwrap();
        let loaded = store.read().unwrap();
        assert!(loaded.ipam.allocated_ips.is_empty());
        assert_eq!(loaded.ipam.next_ip, "172.17.0.2");
    }
}
