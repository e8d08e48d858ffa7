//! Container filesystem construction.
//!
//! Each container gets an overlay of the shared read-only base rootfs
//! with a private writable upper layer, then pivots its root into the
//! merged view.

pub mod mount;
pub mod overlay;
pub mod pivot;
