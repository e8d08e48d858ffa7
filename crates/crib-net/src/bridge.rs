//! The single host-side bridge shared by all containers.
//!
//! The bridge is created once and reused across daemon restarts by name
//! lookup. If it already carries an IPv4 address, that address is adopted
//! as the gateway so a restart never re-allocates; otherwise the gateway
//! comes from the IP allocator and the bridge + IPAM metadata is
//! persisted.

use std::str::FromStr;

use ipnetwork::Ipv4Network;

use crib_common::constants::{BRIDGE_MTU, BRIDGE_NAME};
use crib_common::error::{CribError, Result};

use crate::cmd;
use crate::ipam::IpAllocator;
use crate::store::{BridgeConfig, NetworkState, NetworkStore};

/// Manager for the system bridge interface.
#[derive(Debug)]
pub struct BridgeManager {
    name: String,
    gateway: Option<Ipv4Network>,
}

impl BridgeManager {
    /// Creates a manager for the fixed system bridge name.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: BRIDGE_NAME.to_string(),
            gateway: None,
        }
    }

    /// Bridge interface name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gateway address assigned to the bridge, once ensured.
    #[must_use]
    pub const fn gateway(&self) -> Option<Ipv4Network> {
        self.gateway
    }

    /// Creates or reuses the bridge, brings it up, and ensures it
    /// carries the gateway address. Persists bridge + IPAM metadata.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::BridgeOperationFailed`] when a link operation
    /// fails, or a store error when persistence fails.
    pub fn ensure_bridge(&mut self, allocator: &IpAllocator, store: &NetworkStore) -> Result<()> {
        if !link_exists(&self.name) {
            cmd::run("ip", &["link", "add", "name", &self.name, "type", "bridge"])
                .map_err(|message| self.op_failed(message))?;
            tracing::info!(bridge = %self.name, "bridge created");
        }
        self.bring_up()?;

        if let Some(existing) = self.current_address()? {
            // Daemon restart: the address on the link is the gateway.
            tracing::info!(bridge = %self.name, gateway = %existing, "reusing bridge address");
            self.gateway = Some(existing);
        } else {
            let cidr = allocator.gateway_cidr();
            self.attach_address(&cidr)?;
            self.gateway = Some(Ipv4Network::from_str(&cidr).map_err(|e| CribError::Config {
                message: format!("bad gateway cidr {cidr}: {e}"),
            })?);
        }

        self.persist(allocator, store)
    }

    /// Assigns an address (CIDR notation) to the bridge.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::BridgeOperationFailed`] when the link cannot
    /// be found or modified.
    pub fn attach_address(&self, cidr: &str) -> Result<()> {
        cmd::run("ip", &["addr", "add", cidr, "dev", &self.name])
            .map_err(|message| self.op_failed(message))
    }

    /// Brings the bridge link up.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::BridgeOperationFailed`] on failure.
    pub fn bring_up(&self) -> Result<()> {
        cmd::run("ip", &["link", "set", &self.name, "up"])
            .map_err(|message| self.op_failed(message))
    }

    /// Brings the bridge link down.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::BridgeOperationFailed`] on failure.
    pub fn bring_down(&self) -> Result<()> {
        cmd::run("ip", &["link", "set", &self.name, "down"])
            .map_err(|message| self.op_failed(message))
    }

    /// Deletes the bridge link.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::BridgeOperationFailed`] on failure.
    pub fn delete(&self) -> Result<()> {
        cmd::run("ip", &["link", "delete", &self.name])
            .map_err(|message| self.op_failed(message))
    }

    /// Reads the first IPv4 address currently on the bridge, if any.
    fn current_address(&self) -> Result<Option<Ipv4Network>> {
        let out = cmd::capture("ip", &["-o", "-4", "addr", "show", "dev", &self.name])
            .map_err(|message| self.op_failed(message))?;
        Ok(parse_inet_address(&out))
    }

    /// Writes bridge + IPAM metadata: creates the network record on first
    /// run, or refreshes the IPAM block of an existing one.
    fn persist(&self, allocator: &IpAllocator, store: &NetworkStore) -> Result<()> {
        let mut ipam = allocator.ipam_state();
        if let Some(gw) = self.gateway {
            ipam.gateway = gw.ip().to_string();
            let _ = ipam
                .allocated_ips
                .insert(self.name.clone(), gw.ip().to_string());
        }

        if store.exists() {
            store.update_ipam(&ipam)
        } else {
            let mut state = NetworkState {
                id: uuid::Uuid::new_v4().to_string(),
                name: "default".to_string(),
                created_at: String::new(),
                bridge: BridgeConfig {
                    name: self.name.clone(),
                    mtu: BRIDGE_MTU,
                },
                ipam,
                containers: Vec::new(),
            };
            store.write(&mut state)
        }
    }

    fn op_failed(&self, message: String) -> CribError {
        CribError::BridgeOperationFailed {
            bridge: self.name.clone(),
            message,
        }
    }
}

impl Default for BridgeManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns whether a link with the given name exists.
#[must_use]
pub fn link_exists(name: &str) -> bool {
    cmd::probe("ip", &["link", "show", name])
}

/// Parses the first `inet a.b.c.d/p` from `ip -o -4 addr show` output.
fn parse_inet_address(output: &str) -> Option<Ipv4Network> {
    for line in output.lines() {
        let mut tokens = line.split_whitespace();
        while let Some(tok) = tokens.next() {
            if tok == "inet" {
                if let Some(addr) = tokens.next() {
                    if let Ok(net) = Ipv4Network::from_str(addr) {
                        return Some(net);
                    }
                }
            }
        }
    }
    None
}
