//! Host firewall plumbing for outbound container traffic.
//!
//! Three idempotent operations: the forwarding sysctl, a POSTROUTING
//! masquerade rule for the bridge subnet, and FORWARD accept rules for
//! bridge traffic. Each checks current state first and skips when
//! already correct; [`NatManager::enable_nat`] runs all three
//! best-effort, logging failures without aborting later steps, because
//! these rules are advisory and a restart can repair them.

use crib_common::error::{CribError, Result};

use crate::cmd;

/// Manager for NAT and forwarding rules tied to one bridge + subnet.
#[derive(Debug, Clone)]
pub struct NatManager {
    bridge: String,
    subnet_cidr: String,
}

impl NatManager {
    /// Creates a manager for the given bridge name and subnet (CIDR).
    #[must_use]
    pub fn new(bridge: impl Into<String>, subnet_cidr: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            subnet_cidr: subnet_cidr.into(),
        }
    }

    /// Runs forwarding, masquerading, and FORWARD-rule setup in order.
    /// Failures are logged and do not abort the remaining steps.
    pub fn enable_nat(&self) {
        if let Err(e) = self.enable_ip_forwarding() {
            tracing::warn!(error = %e, "could not enable IP forwarding");
        }
        if let Err(e) = self.setup_masquerading() {
            tracing::warn!(error = %e, "could not set up masquerading");
        }
        if let Err(e) = self.setup_forwarding_rules() {
            tracing::warn!(error = %e, "could not set up forwarding rules");
        }
    }

    /// Sets `net.ipv4.ip_forward=1` unless it is already set.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::NatSetupFailed`] when the sysctl fails.
    pub fn enable_ip_forwarding(&self) -> Result<()> {
        if let Ok(current) = cmd::capture("sysctl", &["-n", "net.ipv4.ip_forward"]) {
            if current.trim() == "1" {
                tracing::debug!("IP forwarding already enabled");
                return Ok(());
            }
        }
        cmd::run("sysctl", &["-w", "net.ipv4.ip_forward=1"]).map_err(nat_failed)?;
        tracing::info!("IP forwarding enabled");
        Ok(())
    }

    /// Installs the POSTROUTING masquerade rule for the subnet unless it
    /// already exists.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::NatSetupFailed`] when iptables is missing or
    /// the rule cannot be added.
    pub fn setup_masquerading(&self) -> Result<()> {
        self.require_iptables()?;
        let rule = self.masquerade_rule();
        let rule: Vec<&str> = rule.iter().map(String::as_str).collect();

        if cmd::probe("iptables", &with_action(&rule, "-C")) {
            tracing::debug!(subnet = %self.subnet_cidr, "masquerade rule already present");
            return Ok(());
        }
        cmd::run("iptables", &with_action(&rule, "-A")).map_err(nat_failed)?;
        tracing::info!(subnet = %self.subnet_cidr, bridge = %self.bridge, "masquerading enabled");
        Ok(())
    }

    /// Installs FORWARD accept rules for bridge traffic unless present.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::NatSetupFailed`] when iptables is missing or
    /// a rule cannot be added.
    pub fn setup_forwarding_rules(&self) -> Result<()> {
        self.require_iptables()?;
        if cmd::probe(
            "iptables",
            &["-C", "FORWARD", "-i", &self.bridge, "-j", "ACCEPT"],
        ) {
            tracing::debug!(bridge = %self.bridge, "forwarding rules already present");
            return Ok(());
        }

        cmd::run(
            "iptables",
            &["-A", "FORWARD", "-i", &self.bridge, "-j", "ACCEPT"],
        )
        .map_err(nat_failed)?;
        cmd::run(
            "iptables",
            &[
                "-A",
                "FORWARD",
                "-o",
                &self.bridge,
                "-m",
                "conntrack",
                "--ctstate",
                "RELATED,ESTABLISHED",
                "-j",
                "ACCEPT",
            ],
        )
        .map_err(nat_failed)?;
        tracing::info!(bridge = %self.bridge, "forwarding rules installed");
        Ok(())
    }

    /// Deletes the masquerade rule.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::NatSetupFailed`] when the deletion fails.
    pub fn remove_masquerading(&self) -> Result<()> {
        let rule = self.masquerade_rule();
        let rule: Vec<&str> = rule.iter().map(String::as_str).collect();
        cmd::run("iptables", &with_action(&rule, "-D")).map_err(nat_failed)
    }

    /// The masquerade rule body, without the `-C`/`-A`/`-D` action.
    #[must_use]
    pub fn masquerade_rule(&self) -> Vec<String> {
        [
            "-t",
            "nat",
            "POSTROUTING",
            "-s",
            &self.subnet_cidr,
            "!",
            "-o",
            &self.bridge,
            "-j",
            "MASQUERADE",
        ]
        .iter()
        .map(ToString::to_string)
        .collect()
    }

    fn require_iptables(&self) -> Result<()> {
        which::which("iptables").map_err(|_| CribError::NatSetupFailed {
            message: "iptables not found in PATH".to_string(),
        })?;
        Ok(())
    }
}

/// Splices the iptables action flag after the `-t nat` table selector
/// (or at the front for filter-table rules).
fn with_action<'a>(rule: &[&'a str], action: &'a str) -> Vec<&'a str> {
    let mut out = Vec::with_capacity(rule.len() + 1);
    if rule.first() == Some(&"-t") {
        out.extend_from_slice(&rule[..2]);
        out.push(action);
        out.extend_from_slice(&rule[2..]);
    } else {
        out.push(action);
        out.extend_from_slice(rule);
    }
    out
}

fn nat_failed(message: String) -> CribError {
    CribError::NatSetupFailed { message }
}
