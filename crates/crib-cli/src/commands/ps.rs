//! `crib ps` — list containers on the default network.

use std::io::Write;

use clap::Args;

use crib_common::types::{ContainerRecord, ContainerStatus};
use crib_net::store::NetworkStore;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Show all containers, including exited ones.
    #[arg(short, long)]
    pub all: bool,
}

/// Executes the `ps` command.
///
/// Reads the persisted default network state and displays its container
/// records in a tabular format.
///
/// # Errors
///
/// Returns an error when the network state exists but cannot be read.
pub fn execute(args: &PsArgs) -> anyhow::Result<()> {
    let store = NetworkStore::system();
    let output = if store.exists() {
        render_table(&store.read()?.containers, args.all)
    } else {
        "No containers found.\n".to_string()
    };
    std::io::stdout().lock().write_all(output.as_bytes())?;
    Ok(())
}

/// Formats container records as a Docker-style table.
fn render_table(containers: &[ContainerRecord], all: bool) -> String {
    use std::fmt::Write;

    let rows: Vec<_> = containers
        .iter()
        .filter(|c| all || c.status != ContainerStatus::Exited)
        .collect();
    if rows.is_empty() {
        return "No containers found.\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<14} {:<20} {:<20} {:<16} {:<10}",
        "CONTAINER ID", "IMAGE", "COMMAND", "CREATED", "STATUS"
    );
    for c in rows {
        let _ = writeln!(
            out,
            "{:<14} {:<20} {:<20} {:<16} {:<10}",
            c.id.short(),
            c.image,
            c.command.join(" "),
            created_ago(&c.created_at),
            c.status
        );
    }
    out
}

/// Humanizes an RFC 3339 timestamp as elapsed time.
fn created_ago(created_at: &str) -> String {
    let Ok(when) = chrono::DateTime::parse_from_rfc3339(created_at) else {
        return created_at.to_string();
    };
    let delta = chrono::Utc::now().signed_duration_since(when);
    if delta.num_days() > 0 {
        format!("{} days ago", delta.num_days())
    } else if delta.num_hours() > 0 {
        format!("{} hours ago", delta.num_hours())
    } else if delta.num_minutes() > 0 {
        format!("{} minutes ago", delta.num_minutes())
    } else {
        "seconds ago".to_string()
    }
}
