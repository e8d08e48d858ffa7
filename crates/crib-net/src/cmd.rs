//! Thin wrappers around external network tooling (`ip`, `iptables`,
//! `sysctl`).
//!
//! All link manipulation goes through `ip(8)` so the calling thread's
//! current network namespace is honored: a child process forked after a
//! `setns(2)` runs inside that namespace.

use std::process::Command;

/// Runs a command and returns whether it exited successfully, swallowing
/// spawn errors. Used for existence probes (`ip link show`, `iptables -C`).
pub fn probe(bin: &str, args: &[&str]) -> bool {
    Command::new(bin)
        .args(args)
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Runs a command, returning combined stderr text on failure.
pub fn run(bin: &str, args: &[&str]) -> Result<(), String> {
    match Command::new(bin).args(args).output() {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => Err(format!(
            "{bin} {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        )),
        Err(e) => Err(format!("could not spawn {bin}: {e}")),
    }
}

/// Runs a command and captures stdout, returning stderr text on failure.
pub fn capture(bin: &str, args: &[&str]) -> Result<String, String> {
    match Command::new(bin).args(args).output() {
        Ok(out) if out.status.success() => Ok(String::from_utf8_lossy(&out.stdout).into_owned()),
        Ok(out) => Err(format!(
            "{bin} {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        )),
        Err(e) => Err(format!("could not spawn {bin}: {e}")),
    }
}
