//! # crib-runtime
//!
//! Container lifecycle orchestration for the crib daemon.
//!
//! - **Spawn**: Re-executing the runtime binary as a namespaced init
//!   process.
//! - **Init**: The code path running inside the container before the
//!   shell starts.
//! - **Registry**: In-memory table of live container records.
//! - **Lifecycle**: The create/wire/limit/reap/teardown sequence.

pub mod init;
pub mod lifecycle;
pub mod registry;
pub mod spawn;

pub use lifecycle::{CreateRequest, Created, Orchestrator};
pub use registry::Registry;
pub use spawn::InitArgs;
