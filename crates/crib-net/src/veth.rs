//! Virtual ethernet pairs connecting containers to the bridge.
//!
//! Interface names are derived from the first 8 characters of the
//! container id (kernel interface names cap at 15 bytes). Two ids
//! sharing that prefix collide; the registry keeps the mapping explicit
//! so teardown deletes exactly what creation recorded.

use std::collections::HashMap;

use crib_common::error::{CribError, Result};
use crib_common::types::ContainerId;

use crate::bridge::{BridgeManager, link_exists};
use crate::cmd;

/// Derives the (host, container) interface names for a container id.
#[must_use]
pub fn pair_names(id: &ContainerId) -> (String, String) {
    (format!("veth-{}", id.short()), format!("vethc-{}", id.short()))
}

/// Registry and factory for veth pairs.
#[derive(Debug, Default)]
pub struct VethManager {
    pairs: HashMap<ContainerId, (String, String)>,
}

impl VethManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a veth pair for the container and attaches the host end
    /// to the bridge. An existing host-side link is reused as-is.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::VethCreationFailed`] when link creation,
    /// master assignment, or bring-up fails.
    pub fn create_pair_and_attach(
        &mut self,
        id: &ContainerId,
        bridge: &BridgeManager,
    ) -> Result<(String, String)> {
        let (host, container) = pair_names(id);

        if link_exists(&host) {
            tracing::debug!(%host, "reusing existing veth pair");
        } else {
            cmd::run(
                "ip",
                &["link", "add", &host, "type", "veth", "peer", "name", &container],
            )
            .map_err(|message| failed(id, message))?;
        }

        cmd::run("ip", &["link", "set", &host, "master", bridge.name()])
            .map_err(|message| failed(id, message))?;
        cmd::run("ip", &["link", "set", &host, "up"]).map_err(|message| failed(id, message))?;

        let _ = self
            .pairs
            .insert(id.clone(), (host.clone(), container.clone()));
        tracing::info!(%host, %container, container_id = %id, "veth pair attached");
        Ok((host, container))
    }

    /// Deletes both ends of a recorded pair and drops the registry
    /// entry. An unregistered id is logged and ignored.
    ///
    /// # Errors
    ///
    /// This is best-effort: individual link deletions that fail are
    /// logged, not returned.
    pub fn delete_pair(&mut self, id: &ContainerId) -> Result<()> {
        let Some((host, container)) = self.pairs.remove(id) else {
            tracing::warn!(container_id = %id, "no veth pair registered, nothing to delete");
            return Ok(());
        };

        for name in [&host, &container] {
            if !link_exists(name) {
                continue;
            }
            if let Err(e) = cmd::run("ip", &["link", "delete", name]) {
                tracing::warn!(link = %name, error = %e, "could not delete veth link");
            }
        }
        tracing::info!(%host, %container, container_id = %id, "veth pair removed");
        Ok(())
    }

    /// Looks up a recorded pair.
    #[must_use]
    pub fn get(&self, id: &ContainerId) -> Option<&(String, String)> {
        self.pairs.get(id)
    }
}

fn failed(id: &ContainerId, message: String) -> CribError {
    CribError::VethCreationFailed {
        container: id.to_string(),
        message,
    }
}
