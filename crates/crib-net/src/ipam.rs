//! IP address management for the bridge network.
//!
//! Owns the private subnet chosen for the bridge and hands out sequential
//! addresses. The on-disk network state, when present, is the source of
//! truth: each allocation is a read-modify-write of the persisted cursor
//! under one file-lock acquisition, so a second daemon process cannot
//! hand out the same address.
//!
//! Address arithmetic is a plain 32-bit increment with an explicit
//! exhaustion error; the cursor is monotonic within a subnet and released
//! addresses are never reissued.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnetwork::Ipv4Network;

use crib_common::constants::SUBNET_CANDIDATES;
use crib_common::error::{CribError, Result};

use crate::store::{IpamState, NetworkStore};

/// Sequential address allocator for one subnet.
#[derive(Debug)]
pub struct IpAllocator {
    subnet: Ipv4Network,
    gateway: Ipv4Addr,
    next_ip: Ipv4Addr,
    allocated: BTreeMap<String, Ipv4Addr>,
    store: NetworkStore,
}

impl IpAllocator {
    /// Initializes the allocator from persisted state when it exists,
    /// otherwise probes host interfaces and picks a free candidate
    /// subnet.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::NoAvailableSubnet`] when every candidate
    /// overlaps a host network, or a parse error when persisted state is
    /// malformed.
    pub fn initialize(store: NetworkStore) -> Result<Self> {
        if store.exists() {
            let state = store.read()?;
            let allocator = Self::from_ipam(&state.ipam, store)?;
            tracing::info!(subnet = %allocator.subnet, "restored network state");
            return Ok(allocator);
        }

        let existing = host_networks()?;
        let subnet = select_subnet(&SUBNET_CANDIDATES, &existing)?;
        let gateway = Ipv4Addr::from(u32::from(subnet.network()) + 1);
        let next_ip = increment(gateway, subnet)?;
        tracing::info!(%subnet, %gateway, "selected fresh subnet");

        Ok(Self {
            subnet,
            gateway,
            next_ip,
            allocated: BTreeMap::new(),
            store,
        })
    }

    /// Rebuilds an allocator from a persisted IPAM block.
    ///
    /// # Errors
    ///
    /// Returns a config error when any field does not parse.
    pub fn from_ipam(ipam: &IpamState, store: NetworkStore) -> Result<Self> {
        let subnet = Ipv4Network::from_str(&ipam.subnet).map_err(|e| CribError::Config {
            message: format!("bad persisted subnet {}: {e}", ipam.subnet),
        })?;
        let gateway = parse_addr(&ipam.gateway)?;
        let next_ip = parse_addr(&ipam.next_ip)?;
        Ok(Self {
            subnet,
            gateway,
            next_ip,
            allocated: parse_allocated(&ipam.allocated_ips)?,
            store,
        })
    }

    /// Returns the next allocatable address and records its owner.
    ///
    /// When persisted state exists, the read of the cursor and the write
    /// of its successor happen under one lock acquisition, so concurrent
    /// writers observe each other's allocations and never share a value.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::SubnetExhausted`] when the cursor would leave
    /// the subnet, or a lock/store error when persistence fails.
    pub fn allocate(&mut self, owner: &str) -> Result<Ipv4Addr> {
        let subnet = self.subnet;
        let (ip, next) = if self.store.exists() {
            self.store.mutate_ipam(|ipam| {
                let ip = parse_addr(&ipam.next_ip)?;
                let next = increment(ip, subnet)?;
                ipam.next_ip = next.to_string();
                let _ = ipam
                    .allocated_ips
                    .insert(owner.to_string(), ip.to_string());
                Ok((ip, next))
            })?
        } else {
            let ip = self.next_ip;
            (ip, increment(ip, subnet)?)
        };

        self.next_ip = next;
        let _ = self.allocated.insert(owner.to_string(), ip);
        tracing::debug!(%ip, owner, "allocated address");
        Ok(ip)
    }

    /// Forgets an owner's allocation. The cursor never rewinds.
    ///
    /// # Errors
    ///
    /// Returns a lock/store error when the persisted map cannot be
    /// updated.
    pub fn release(&mut self, owner: &str) -> Result<()> {
        let _ = self.allocated.remove(owner);
        if self.store.exists() {
            self.store.release_ip(owner)?;
        }
        Ok(())
    }

    /// The fixed gateway address chosen at initialization.
    #[must_use]
    pub const fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// The gateway with the subnet's prefix, e.g. `172.17.0.1/16`.
    #[must_use]
    pub fn gateway_cidr(&self) -> String {
        format!("{}/{}", self.gateway, self.subnet.prefix())
    }

    /// The subnet this allocator owns.
    #[must_use]
    pub const fn subnet(&self) -> Ipv4Network {
        self.subnet
    }

    /// Formats an address with the subnet's prefix length.
    #[must_use]
    pub fn with_prefix(&self, ip: Ipv4Addr) -> String {
        format!("{}/{}", ip, self.subnet.prefix())
    }

    /// Snapshot of the allocation state for persistence.
    #[must_use]
    pub fn ipam_state(&self) -> IpamState {
        IpamState {
            subnet: self.subnet.to_string(),
            gateway: self.gateway.to_string(),
            next_ip: self.next_ip.to_string(),
            allocated_ips: self
                .allocated
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
        }
    }
}

/// Advances an address by one within `subnet`.
///
/// # Errors
///
/// Returns [`CribError::SubnetExhausted`] when the successor is outside
/// the subnet or is its broadcast address.
pub fn increment(ip: Ipv4Addr, subnet: Ipv4Network) -> Result<Ipv4Addr> {
    let exhausted = || CribError::SubnetExhausted {
        subnet: subnet.to_string(),
    };
    let next = u32::from(ip).checked_add(1).ok_or_else(exhausted)?;
    let next = Ipv4Addr::from(next);
    if !subnet.contains(next) || next == subnet.broadcast() {
        return Err(exhausted());
    }
    Ok(next)
}

/// Picks the first candidate subnet that does not overlap any existing
/// network. Overlap means either network contains the other's base
/// address.
///
/// # Errors
///
/// Returns [`CribError::NoAvailableSubnet`] when all candidates conflict.
pub fn select_subnet(candidates: &[&str], existing: &[Ipv4Network]) -> Result<Ipv4Network> {
    for candidate in candidates {
        let Ok(net) = Ipv4Network::from_str(candidate) else {
            continue;
        };
        if !existing.iter().any(|e| overlaps(net, *e)) {
            return Ok(net);
        }
    }
    Err(CribError::NoAvailableSubnet)
}

fn overlaps(a: Ipv4Network, b: Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

/// Collects the IPv4 networks of all non-loopback host interfaces.
///
/// # Errors
///
/// Returns a config error when interface enumeration fails.
pub fn host_networks() -> Result<Vec<Ipv4Network>> {
    use nix::net::if_::InterfaceFlags;

    let addrs = nix::ifaddrs::getifaddrs().map_err(|e| CribError::Config {
        message: format!("could not list host interfaces: {e}"),
    })?;

    let mut networks = Vec::new();
    for ifaddr in addrs {
        if ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK) {
            continue;
        }
        let (Some(addr), Some(mask)) = (ifaddr.address, ifaddr.netmask) else {
            continue;
        };
        let (Some(addr), Some(mask)) = (addr.as_sockaddr_in(), mask.as_sockaddr_in()) else {
            continue;
        };
        let prefix = u32::from(mask.ip()).count_ones();
        if let Ok(net) = Ipv4Network::new(addr.ip(), prefix.try_into().unwrap_or(32)) {
            networks.push(net);
        }
    }
    Ok(networks)
}

fn parse_addr(s: &str) -> Result<Ipv4Addr> {
    Ipv4Addr::from_str(s).map_err(|e| CribError::Config {
        message: format!("bad persisted address {s}: {e}"),
    })
}

fn parse_allocated(map: &BTreeMap<String, String>) -> Result<BTreeMap<String, Ipv4Addr>> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), parse_addr(v)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Network {
        Ipv4Network::from_str(s).unwrap()
    }

    fn fresh_allocator(dir: &std::path::Path) -> IpAllocator {
        let store = NetworkStore::at(dir);
        let subnet = net("172.17.0.0/16");
        IpAllocator::from_ipam(
            &IpamState {
                subnet: subnet.to_string(),
                gateway: "172.17.0.1".into(),
                next_ip: "172.17.0.2".into(),
                allocated_ips: BTreeMap::new(),
            },
            store,
        )
        .unwrap()
    }

    #[test]
    fn allocations_are_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let mut alloc = fresh_allocator(dir.path());

        let a = alloc.allocate("one").unwrap();
        let b = alloc.allocate("two").unwrap();
        let c = alloc.allocate("three").unwrap();
        assert!(u32::from(b) > u32::from(a));
        assert!(u32::from(c) > u32::from(b));
        assert_eq!(a, Ipv4Addr::new(172, 17, 0, 2));
        assert_eq!(b, Ipv4Addr::new(172, 17, 0, 3));
    }

    #[test]
    fn release_does_not_rewind_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let mut alloc = fresh_allocator(dir.path());

        let a = alloc.allocate("one").unwrap();
        alloc.release("one").unwrap();
        let b = alloc.allocate("two").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn increment_crosses_octet_boundaries() {
        let subnet = net("172.17.0.0/16");
        let next = increment(Ipv4Addr::new(172, 17, 0, 255), subnet).unwrap();
        assert_eq!(next, Ipv4Addr::new(172, 17, 1, 0));
    }

    #[test]
    fn increment_reports_exhaustion_at_broadcast() {
        let subnet = net("192.168.100.0/30");
        // .1 -> .2 is the last usable host; .3 is broadcast.
        let last = increment(Ipv4Addr::new(192, 168, 100, 1), subnet).unwrap();
        assert_eq!(last, Ipv4Addr::new(192, 168, 100, 2));
        let err = increment(last, subnet).unwrap_err();
        assert!(matches!(err, CribError::SubnetExhausted { .. }));
    }

    #[test]
    fn increment_reports_exhaustion_outside_subnet() {
        let subnet = net("172.17.0.0/16");
        let err = increment(Ipv4Addr::new(172, 18, 0, 1), subnet).unwrap_err();
        assert!(matches!(err, CribError::SubnetExhausted { .. }));
    }

    #[test]
    fn select_skips_conflicting_candidates() {
        let existing = vec![net("172.17.5.0/24")];
        let chosen = select_subnet(&SUBNET_CANDIDATES, &existing).unwrap();
        assert_eq!(chosen, net("172.18.0.0/16"));
    }

    #[test]
    fn select_detects_containment_both_ways() {
        // Host network wider than the candidate.
        let existing = vec![net("172.16.0.0/12")];
        let chosen = select_subnet(&SUBNET_CANDIDATES, &existing).unwrap();
        assert_eq!(chosen, net("10.88.0.0/16"));
    }

    #[test]
    fn select_fails_when_everything_conflicts() {
        let existing = vec![net("0.0.0.0/0")];
        let err = select_subnet(&SUBNET_CANDIDATES, &existing).unwrap_err();
        assert!(matches!(err, CribError::NoAvailableSubnet));
    }

    #[test]
    fn allocator_reloads_cursor_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = NetworkStore::at(dir.path());

        let mut state = crate::store::NetworkState {
            id: "n".into(),
            name: "default".into(),
            created_at: String::new(),
            bridge: crate::store::BridgeConfig {
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
        };
        store.write(&mut state).unwrap();

        let mut alloc = IpAllocator::initialize(NetworkStore::at(dir.path())).unwrap();
        let a = alloc.allocate("one").unwrap();
        assert_eq!(a, Ipv4Addr::new(172, 17, 0, 2));

        // A second allocator over the same directory sees the advanced
        // cursor on disk, not its own stale copy.
        let mut other = IpAllocator::initialize(NetworkStore::at(dir.path())).unwrap();
        let b = other.allocate("two").unwrap();
        assert_eq!(b, Ipv4Addr::new(172, 17, 0, 3));
    }

    #[test]
    fn gateway_cidr_carries_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = fresh_allocator(dir.path());
        assert_eq!(alloc.gateway_cidr(), "172.17.0.1/16");
    }
}
