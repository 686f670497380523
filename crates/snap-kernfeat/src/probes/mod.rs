//! Kernel feature probes.
//!
//! Each probe is an independent, minimal interaction with the kernel that
//! elicits an observable side effect revealing one version-sensitive fact.
//! Probes share a uniform signature so the orchestrator in
//! [`crate::detect`] can run them as ordered named steps. Every probe
//! releases its scratch mapping and descriptors on all exit paths.

pub mod dirty;
pub mod last_cap;
pub mod memfd;
pub mod shmem;
pub mod tcp;
pub mod zero_page;

use crate::sys::{KernelOps, Protection, Visibility};
use snap_common::{Error, Result};
use tracing::debug;

/// Scratch page mapping released on drop, covering failure exits.
pub(crate) struct PageGuard<'k, K: KernelOps> {
    kernel: &'k K,
    addr: usize,
}

impl<'k, K: KernelOps> PageGuard<'k, K> {
    pub(crate) fn map(
        kernel: &'k K,
        visibility: Visibility,
        protection: Protection,
    ) -> Result<Self> {
        let addr = kernel.map_anon_page(visibility, protection)?;
        Ok(Self { kernel, addr })
    }

    pub(crate) fn addr(&self) -> usize {
        self.addr
    }
}

impl<K: KernelOps> Drop for PageGuard<'_, K> {
    fn drop(&mut self) {
        if let Err(err) = self.kernel.unmap_page(self.addr) {
            debug!(addr = self.addr, error = %err, "failed to unmap scratch page");
        }
    }
}

/// Attach probe and operation context to a raw kernel-layer error.
pub(crate) fn kernel_err(probe: &'static str, op: &'static str) -> impl FnOnce(Error) -> Error {
    move |err| match err {
        Error::Io(source) => Error::Kernel { probe, op, source },
        other => other,
    }
}
