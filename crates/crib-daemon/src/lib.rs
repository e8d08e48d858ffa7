//! # crib-daemon
//!
//! The background control-plane daemon.
//!
//! Serves the container API over a Unix domain socket, owns the
//! lifecycle orchestrator, and manages the daemon's PID file. Clients
//! (the `crib` CLI) create containers through the API and then attach
//! to them with `nsenter`.

pub mod api;
pub mod server;

pub use server::{Server, bootstrap};
