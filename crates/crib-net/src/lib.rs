//! Container networking for the crib runtime.
//!
//! Composes four leaf managers — IP allocation, the single host bridge,
//! veth pairs, and NAT rules — under a [`manager::NetworkManager`] that
//! orchestrates wiring a container's namespace. Network state is durable:
//! the allocator cursor and bridge metadata survive daemon restarts via a
//! file-locked YAML store.
//!
//! Namespace-sensitive operations (moving a veth into a container
//! namespace and configuring it there) must run on a single dedicated
//! thread with no other namespace-sensitive work interleaved; see
//! [`netns::NetnsGuard`].

pub mod bridge;
mod cmd;
pub mod ipam;
pub mod lock;
pub mod manager;
pub mod nat;
pub mod netns;
pub mod store;
pub mod veth;
