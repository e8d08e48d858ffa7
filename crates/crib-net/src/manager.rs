//! Network orchestration: composing the allocator, bridge, veth, and
//! NAT managers into the container attachment sequence.
//!
//! The ordering in [`NetworkManager::setup_container_interface`] is
//! load-bearing: interface configuration happens while attached to the
//! container's namespace, and NAT rules are installed only after the
//! host namespace is restored.

use crib_common::constants::CONTAINER_IFACE;
use crib_common::error::{CribError, Result};
use crib_common::types::{ContainerId, ContainerRecord};

use crate::bridge::BridgeManager;
use crate::cmd;
use crate::ipam::IpAllocator;
use crate::nat::NatManager;
use crate::netns::NetnsGuard;
use crate::store::NetworkStore;
use crate::veth::VethManager;

/// Read access to the live container registry.
///
/// Implemented by the daemon's registry; keeps this crate free of a
/// dependency on the runtime crate.
pub trait ContainerLookup {
    /// Returns a snapshot of the record for `id`, if registered.
    fn lookup(&self, id: &ContainerId) -> Option<ContainerRecord>;
}

/// Composed owner of all network subsystems for one daemon process.
///
/// Constructed once at startup and passed by reference to request
/// handlers; there is exactly one bridge and one allocator system-wide.
#[derive(Debug)]
pub struct NetworkManager {
    ipam: IpAllocator,
    bridge: BridgeManager,
    veth: VethManager,
    nat: NatManager,
    store: NetworkStore,
}

impl NetworkManager {
    /// Initializes the allocator, ensures the bridge, and prepares NAT
    /// management.
    ///
    /// # Errors
    ///
    /// Returns an error when subnet selection fails, the bridge cannot
    /// be created, or persisted state is malformed.
    pub fn new(store: NetworkStore) -> Result<Self> {
        let ipam = IpAllocator::initialize(store.clone())?;
        let mut bridge = BridgeManager::new();
        bridge.ensure_bridge(&ipam, &store)?;

        let nat = NatManager::new(bridge.name(), ipam.subnet().to_string());
        Ok(Self {
            ipam,
            bridge,
            veth: VethManager::new(),
            nat,
            store,
        })
    }

    /// Assembles a manager from prebuilt parts without touching the
    /// host. [`NetworkManager::new`] is the production path.
    #[must_use]
    pub const fn from_parts(
        ipam: IpAllocator,
        bridge: BridgeManager,
        veth: VethManager,
        nat: NatManager,
        store: NetworkStore,
    ) -> Self {
        Self {
            ipam,
            bridge,
            veth,
            nat,
            store,
        }
    }

    /// Creates a veth pair for the container and attaches the host end
    /// to the bridge.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::VethCreationFailed`] when any link command
    /// fails.
    pub fn attach_veth(&mut self, id: &ContainerId) -> Result<(String, String)> {
        self.veth.create_pair_and_attach(id, &self.bridge)
    }

    /// Deletes a container's recorded veth pair, best-effort.
    ///
    /// # Errors
    ///
    /// Currently never fails; kept fallible for parity with creation.
    pub fn detach_veth(&mut self, id: &ContainerId) -> Result<()> {
        self.veth.delete_pair(id)
    }

    /// The IP allocator.
    pub const fn ipam_mut(&mut self) -> &mut IpAllocator {
        &mut self.ipam
    }

    /// The IP allocator, read-only.
    #[must_use]
    pub const fn ipam(&self) -> &IpAllocator {
        &self.ipam
    }

    /// The bridge manager.
    #[must_use]
    pub const fn bridge(&self) -> &BridgeManager {
        &self.bridge
    }

    /// The veth manager.
    pub const fn veth_mut(&mut self) -> &mut VethManager {
        &mut self.veth
    }

    /// The NAT manager.
    #[must_use]
    pub const fn nat(&self) -> &NatManager {
        &self.nat
    }

    /// The backing network store.
    #[must_use]
    pub const fn store(&self) -> &NetworkStore {
        &self.store
    }

    /// Wires up a spawned container's network interface.
    ///
    /// Sequence: resolve the registered record; move the container-side
    /// veth into the init process's namespace; inside that namespace
    /// (scoped by [`NetnsGuard`]) rename it to `eth0`, assign the
    /// allocated address, bring it up, install the default route, and
    /// ensure loopback is up; then, back in the host namespace, enable
    /// NAT.
    ///
    /// Must be called from a thread with no other namespace-sensitive
    /// network work in flight.
    ///
    /// # Errors
    ///
    /// Returns a stage-typed error: [`CribError::NotFound`] for an
    /// unregistered id, [`CribError::InterfaceNotFound`],
    /// [`CribError::NamespaceSwitchFailed`], or
    /// [`CribError::RouteInstallFailed`].
    pub fn setup_container_interface(
        &self,
        id: &ContainerId,
        containers: &dyn ContainerLookup,
    ) -> Result<()> {
        let record = containers.lookup(id).ok_or_else(|| CribError::NotFound {
            kind: "container",
            id: id.to_string(),
        })?;
        let veth = &record.network.container_veth;
        let pid = record.pid.to_string();

        // Host side: push the container end of the pair into the target
        // namespace. After this the link is invisible from the host.
        cmd::run("ip", &["link", "set", veth, "netns", &pid]).map_err(|message| {
            CribError::InterfaceNotFound {
                name: format!("{veth}: {message}"),
            }
        })?;

        {
            let _guard = NetnsGuard::enter_pid(record.pid)?;
            self.configure_inside_namespace(&record)?;
            // Guard drop restores the host namespace here, before any
            // NAT work below.
        }

        self.nat.enable_nat();
        tracing::info!(container_id = %id, ip = %record.network.ip, "container interface ready");
        Ok(())
    }

    /// Interface configuration running while attached to the container
    /// namespace.
    fn configure_inside_namespace(&self, record: &ContainerRecord) -> Result<()> {
        let veth = &record.network.container_veth;
        let ip_cidr = self.ipam.with_prefix(
            record
                .network
                .ip
                .parse()
                .map_err(|e| CribError::Config {
                    message: format!("bad recorded ip {}: {e}", record.network.ip),
                })?,
        );

        cmd::run("ip", &["link", "set", veth, "name", CONTAINER_IFACE]).map_err(|message| {
            CribError::InterfaceNotFound {
                name: format!("{veth}: {message}"),
            }
        })?;
        cmd::run("ip", &["addr", "add", &ip_cidr, "dev", CONTAINER_IFACE])
            .map_err(route_failed)?;
        cmd::run("ip", &["link", "set", CONTAINER_IFACE, "up"]).map_err(route_failed)?;
        cmd::run(
            "ip",
            &["route", "add", "default", "via", &record.network.gateway],
        )
        .map_err(route_failed)?;
        cmd::run("ip", &["link", "set", "lo", "up"]).map_err(route_failed)?;
        Ok(())
    }
}

fn route_failed(message: String) -> CribError {
    CribError::RouteInstallFailed { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crib_common::types::NetworkInfo;

    struct EmptyLookup;

    impl ContainerLookup for EmptyLookup {
        fn lookup(&self, _id: &ContainerId) -> Option<ContainerRecord> {
            None
        }
    }

    struct OneLookup(ContainerRecord);

    impl ContainerLookup for OneLookup {
        fn lookup(&self, id: &ContainerId) -> Option<ContainerRecord> {
            (self.0.id == *id).then(|| self.0.clone())
        }
    }

    fn test_manager(dir: &std::path::Path) -> NetworkManager {
        let store = NetworkStore::at(dir);
        let ipam = IpAllocator::from_ipam(
            &crate::store::IpamState {
                subnet: "172.17.0.0/16".into(),
                gateway: "172.17.0.1".into(),
                next_ip: "172.17.0.2".into(),
                allocated_ips: std::collections::BTreeMap::new(),
            },
            store.clone(),
        )
        .unwrap();
        NetworkManager {
            ipam,
            bridge: BridgeManager::new(),
            veth: VethManager::new(),
            nat: NatManager::new("crib0", "172.17.0.0/16"),
            store,
        }
    }

    #[test]
    fn unregistered_container_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = test_manager(dir.path());
        let err = mgr
            .setup_container_interface(&ContainerId::generate(), &EmptyLookup)
            .unwrap_err();
        assert!(matches!(
            err,
            CribError::NotFound {
                kind: "container",
                ..
            }
        ));
    }

    #[test]
    fn missing_veth_surfaces_as_interface_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = test_manager(dir.path());
        let id = ContainerId::generate();
        let record = ContainerRecord::new(
            id.clone(),
            std::process::id().try_into().unwrap_or(i32::MAX),
            String::new(),
            NetworkInfo {
                container_veth: "vethc-does-not-exist".into(),
                ..NetworkInfo::default()
            },
        );
        // `ip link set ... netns` fails because the link does not exist.
        let err = mgr
            .setup_container_interface(&id, &OneLookup(record))
            .unwrap_err();
        assert!(matches!(err, CribError::InterfaceNotFound { .. }));
    }
}
