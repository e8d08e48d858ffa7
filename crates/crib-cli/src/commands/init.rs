//! Hidden container init entrypoint.
//!
//! Invoked by the daemon as `/proc/self/exe init <id> <memory> <cpu>
//! <veth> <gateway> <ip>` after namespace unsharing. The positional
//! order must match the spawner's argument vector.

use clap::Args;

use crib_common::types::ContainerId;
use crib_runtime::InitArgs;

/// Positional argument contract with the daemon's spawner.
#[derive(Args, Debug)]
pub struct InitCmd {
    /// Container id.
    pub container_id: String,
    /// Memory limit spec.
    pub memory_limit: String,
    /// CPU limit percentage.
    pub cpu_limit: String,
    /// Container-side veth name.
    pub container_veth: String,
    /// Gateway address.
    pub gateway: String,
    /// Container address.
    pub ip: String,
}

/// Executes the init entrypoint and exits with the shell's code.
///
/// # Errors
///
/// Returns an error when container preparation fails.
pub fn execute(cmd: InitCmd) -> anyhow::Result<()> {
    let args = InitArgs {
        id: ContainerId::new(cmd.container_id),
        memory_limit: cmd.memory_limit,
        cpu_limit: cmd.cpu_limit,
        container_veth: cmd.container_veth,
        gateway: cmd.gateway,
        ip: cmd.ip,
    };
    let code = crib_runtime::init::run(&args)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
