//! In-memory container registry.
//!
//! The registry is the source of truth while the daemon runs; the
//! network store and per-container JSON files mirror it for listing and
//! crash recovery. Lookups take a read lock, mutations a write lock.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crib_common::error::{CribError, Result};
use crib_common::types::{ContainerId, ContainerRecord, ContainerStatus};
use crib_net::manager::ContainerLookup;

type Map = HashMap<ContainerId, ContainerRecord>;

/// Shared table of container records, keyed by id.
#[derive(Debug, Default)]
pub struct Registry {
    containers: RwLock<Map>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read_map(&self) -> RwLockReadGuard<'_, Map> {
        self.containers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, Map> {
        self.containers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces a record.
    pub fn add(&self, record: ContainerRecord) {
        let _ = self.write_map().insert(record.id.clone(), record);
    }

    /// Returns a snapshot of one record.
    #[must_use]
    pub fn get(&self, id: &ContainerId) -> Option<ContainerRecord> {
        self.read_map().get(id).cloned()
    }

    /// Snapshots every record, ordered by creation time.
    #[must_use]
    pub fn list(&self) -> Vec<ContainerRecord> {
        let mut records: Vec<_> = self.read_map().values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    /// Updates the status marker on one record.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::NotFound`] for an unknown id.
    pub fn set_status(&self, id: &ContainerId, status: ContainerStatus) -> Result<()> {
        match self.write_map().get_mut(id) {
            Some(record) => {
                record.status = status;
                Ok(())
            }
            None => Err(CribError::NotFound {
                kind: "container",
                id: id.to_string(),
            }),
        }
    }
}

impl ContainerLookup for Registry {
    fn lookup(&self, id: &ContainerId) -> Option<ContainerRecord> {
        self.get(id)
    }
}

/// Writes the per-container JSON record under the data directory.
///
/// # Errors
///
/// Returns a serialization or I/O error.
pub fn save_record(record: &ContainerRecord) -> Result<()> {
    save_record_in(Path::new(crib_common::constants::CONTAINER_DIR), record)
}

/// Writes the record as pretty JSON into `dir`.
///
/// # Errors
///
/// Returns a serialization or I/O error.
pub fn save_record_in(dir: &Path, record: &ContainerRecord) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| CribError::io(dir, e))?;
    let path = dir.join(format!("{}.json", record.id));
    let data = serde_json::to_string_pretty(record)?;
    std::fs::write(&path, data).map_err(|e| CribError::io(&path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crib_common::types::NetworkInfo;

    fn record(id: &str, pid: i32) -> ContainerRecord {
        ContainerRecord::new(
            ContainerId::new(id),
            pid,
            String::new(),
            NetworkInfo::default(),
        )
    }

    #[test]
    fn add_then_get_round_trips() {
        let reg = Registry::new();
        reg.add(record("c1", 10));
        let got = reg.get(&ContainerId::new("c1")).unwrap();
        assert_eq!(got.pid, 10);
    }

    #[test]
    fn lookup_trait_matches_get() {
        let reg = Registry::new();
        reg.add(record("c1", 10));
        let via_trait = ContainerLookup::lookup(&reg, &ContainerId::new("c1"));
        assert_eq!(via_trait.map(|r| r.pid), Some(10));
        assert!(ContainerLookup::lookup(&reg, &ContainerId::new("c2")).is_none());
    }

    #[test]
    fn set_status_on_unknown_id_is_not_found() {
        let reg = Registry::new();
        let err = reg
            .set_status(&ContainerId::new("ghost"), ContainerStatus::Exited)
            .unwrap_err();
        assert!(matches!(err, CribError::NotFound { .. }));
    }

    #[test]
    fn set_status_transitions_the_record() {
        let reg = Registry::new();
        reg.add(record("c1", 10));
        reg.set_status(&ContainerId::new("c1"), ContainerStatus::Exited)
            .unwrap();
        assert_eq!(
            reg.get(&ContainerId::new("c1")).unwrap().status,
            ContainerStatus::Exited
        );
    }

    #[test]
    fn list_orders_by_creation_time() {
        let reg = Registry::new();
        let mut first = record("a", 1);
        first.created_at = "2026-01-01T00:00:00Z".into();
        let mut second = record("b", 2);
        second.created_at = "2026-01-02T00:00:00Z".into();
        reg.add(second);
        reg.add(first);
        let ids: Vec<_> = reg.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![ContainerId::new("a"), ContainerId::new("b")]);
    }

    #[test]
    fn saved_record_is_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let rec = record("c1", 42);
        save_record_in(dir.path(), &rec).unwrap();

        let data = std::fs::read_to_string(dir.path().join("c1.json")).unwrap();
        let loaded: ContainerRecord = serde_json::from_str(&data).unwrap();
        assert_eq!(loaded.pid, 42);
        assert_eq!(loaded.command, vec!["/bin/sh"]);
    }
}
