//! The container create/wire/limit/reap/teardown sequence.
//!
//! Creation order is load-bearing: the veth pair and address exist
//! before the init process spawns, and the registry record exists
//! before network wiring so the namespace setup can resolve it. Wiring
//! and limit failures after a successful spawn are logged, not
//! returned; the container keeps running degraded rather than leaking a
//! live process.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crib_common::error::Result;
use crib_common::types::{ContainerId, ContainerRecord, ContainerStatus, NetworkInfo};
use crib_core::cgroup::CgroupLimiter;
use crib_core::filesystem::overlay;
use crib_net::manager::NetworkManager;

use crate::registry::{self, Registry};
use crate::spawn::{self, InitArgs};

/// Parameters of one container creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Image name, informational only.
    pub name: String,
    /// Directory the request originated from, informational only.
    #[serde(default)]
    pub origin_folder: String,
    /// Memory limit spec, e.g. `100m`.
    pub memory_limit: String,
    /// CPU limit as a percentage weight, e.g. `50`.
    pub cpu_limit: String,
}

/// Result of a successful creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Created {
    /// PID of the container init process, for `nsenter`.
    pub pid: i32,
    /// Argument vector running inside the container.
    pub cmd: Vec<String>,
}

/// Owner of all lifecycle state for one daemon process.
///
/// The network manager sits behind a mutex: namespace-sensitive wiring
/// must never run concurrently with other network work, because the
/// calling thread temporarily joins the container's namespace.
#[derive(Debug)]
pub struct Orchestrator {
    registry: Arc<Registry>,
    network: Mutex<NetworkManager>,
    cgroup: CgroupLimiter,
}

impl Orchestrator {
    /// Wraps an initialized network manager with a fresh registry and
    /// the system cgroup subtree.
    #[must_use]
    pub fn new(network: NetworkManager) -> Self {
        Self::with_cgroup(network, CgroupLimiter::system())
    }

    /// Constructor with an explicit cgroup limiter (tests).
    #[must_use]
    pub fn with_cgroup(network: NetworkManager, cgroup: CgroupLimiter) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            network: Mutex::new(network),
            cgroup,
        }
    }

    /// The shared container registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn network(&self) -> MutexGuard<'_, NetworkManager> {
        self.network.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a container end to end.
    ///
    /// Sequence: allocate veth pair and address, spawn the namespaced
    /// init process, register the record, wire the interface, apply
    /// resource limits, persist, then hand the child to a reaper
    /// thread.
    ///
    /// # Errors
    ///
    /// A failure before or during spawn aborts the request with no
    /// registry entry, undoing the veth pair and address. Failures
    /// after a successful spawn are logged and the creation still
    /// succeeds.
    pub fn create(self: &Arc<Self>, req: &CreateRequest) -> Result<Created> {
        let id = ContainerId::generate();
        tracing::info!(container_id = %id, image = %req.name, "creating container");

        let bridge_name;
        let gateway;
        let (host_veth, container_veth);
        let ip;
        {
            let mut net = self.network();
            bridge_name = net.bridge().name().to_string();
            gateway = net.ipam().gateway().to_string();
            let pair = net.attach_veth(&id)?;
            host_veth = pair.0;
            container_veth = pair.1;
            ip = match net.ipam_mut().allocate(id.as_str()) {
                Ok(addr) => addr.to_string(),
                Err(e) => {
                    let _ = net.detach_veth(&id);
                    return Err(e);
                }
            };
        }

        let init = InitArgs {
            id: id.clone(),
            memory_limit: req.memory_limit.clone(),
            cpu_limit: req.cpu_limit.clone(),
            container_veth: container_veth.clone(),
            gateway: gateway.clone(),
            ip: ip.clone(),
        };
        let child = match spawn::spawn_init(&init) {
            Ok(child) => child,
            Err(e) => {
                let mut net = self.network();
                let _ = net.detach_veth(&id);
                if let Err(re) = net.ipam_mut().release(id.as_str()) {
                    tracing::warn!(container_id = %id, error = %re, "address release failed");
                }
                return Err(e);
            }
        };
        let pid = child.as_raw();

        let record = ContainerRecord::new(
            id.clone(),
            pid,
            req.name.clone(),
            NetworkInfo {
                ip,
                gateway,
                bridge: bridge_name,
                host_veth,
                container_veth,
            },
        );
        self.registry.add(record.clone());

        {
            let net = self.network();
            if let Err(e) = net.setup_container_interface(&id, self.registry.as_ref()) {
                tracing::error!(
                    container_id = %id,
                    error = %e,
                    "network wiring failed, container running without connectivity"
                );
            }
        }

        if let Err(e) = self
            .cgroup
            .apply_limits(pid, &req.memory_limit, &req.cpu_limit)
        {
            tracing::error!(container_id = %id, error = %e, "resource limits not applied");
        }

        if let Err(e) = self.network().store().append_container(&record) {
            tracing::warn!(container_id = %id, error = %e, "network store append failed");
        }
        if let Err(e) = registry::save_record(&record) {
            tracing::warn!(container_id = %id, error = %e, "record file write failed");
        }

        self.spawn_reaper(id, child);
        Ok(Created {
            pid,
            cmd: record.command,
        })
    }

    /// Watches one container init process and tears it down on exit.
    fn spawn_reaper(self: &Arc<Self>, id: ContainerId, child: Pid) {
        let this = Arc::clone(self);
        let builder = std::thread::Builder::new().name(format!("reap-{}", id.short()));
        let spawned = builder.spawn(move || {
            loop {
                match waitpid(child, None) {
                    Ok(WaitStatus::Exited(_, code)) => {
                        tracing::info!(container_id = %id, code, "container exited");
                        break;
                    }
                    Ok(WaitStatus::Signaled(_, signal, _)) => {
                        tracing::info!(container_id = %id, %signal, "container killed");
                        break;
                    }
                    Ok(_) | Err(Errno::EINTR) => {}
                    Err(e) => {
                        tracing::warn!(container_id = %id, error = %e, "waiting on init failed");
                        break;
                    }
                }
            }
            this.teardown(&id);
        });
        if let Err(e) = spawned {
            tracing::error!(error = %e, "could not start reaper thread");
        }
    }

    /// Reclaims every resource a container owns.
    ///
    /// Runs the same fixed order on every terminal transition: overlay,
    /// veth pair, address, cgroup, status markers. Each step is
    /// best-effort so one failure never strands the rest.
    pub fn teardown(&self, id: &ContainerId) {
        overlay::destroy_overlay(id.as_str());

        {
            let mut net = self.network();
            if let Err(e) = net.detach_veth(id) {
                tracing::warn!(container_id = %id, error = %e, "veth teardown failed");
            }
            if let Err(e) = net.ipam_mut().release(id.as_str()) {
                tracing::warn!(container_id = %id, error = %e, "address release failed");
            }
            if let Err(e) = net.store().set_container_status(id, ContainerStatus::Exited) {
                tracing::warn!(container_id = %id, error = %e, "store status update failed");
            }
        }

        // Shared subtree: removal only succeeds once no container
        // remains attached.
        if let Err(e) = self.cgroup.destroy() {
            tracing::debug!(error = %e, "cgroup subtree still busy");
        }

        if let Err(e) = self.registry.set_status(id, ContainerStatus::Exited) {
            tracing::warn!(container_id = %id, error = %e, "registry status update failed");
        }
        tracing::info!(container_id = %id, "resources reclaimed");
    }
}
