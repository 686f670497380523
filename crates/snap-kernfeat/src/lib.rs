//! procsnap kernel feature detection.
//!
//! Before the checkpoint/restore engine captures or reconstructs process
//! state, it needs to know which version-sensitive kernel facilities exist
//! on this host and with what parameters: the device backing anonymous
//! shared mappings, soft-dirty page tracking, the zero page's frame number,
//! the highest capability bit, reclaimable memfd support, and the TCP
//! socket buffer ceilings.
//!
//! This crate provides:
//! - [`cache::FeatureCache`] — the write-once record of detected facts
//! - [`probes`] — one independent detection recipe per fact
//! - [`detect::init_for_capture`] / [`detect::init_for_restore`] — the two
//!   ordered, fail-fast initialization sequences
//! - [`sys::KernelOps`] / [`sys::HostKernel`] — the primitive kernel query
//!   layer the probes run against
//!
//! The binary entry point is in `main.rs`.

pub mod cache;
pub mod detect;
pub mod logging;
pub mod probes;
pub mod sys;

pub use cache::{FeatureCache, FsKind, FsStatCache};
pub use detect::{init_for_capture, init_for_restore};
pub use sys::{HostKernel, KernelOps};
