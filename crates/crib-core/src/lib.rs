//! Linux isolation primitives for the crib runtime.
//!
//! Overlay filesystem construction and teardown, root switching via
//! `pivot_root(2)`, the pseudo-filesystem mounts every container needs,
//! and cgroup v2 resource limiting.

pub mod cgroup;
pub mod filesystem;
